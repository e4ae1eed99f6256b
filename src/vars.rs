/// The shell's variable table.
///
/// Three names are predefined: `$` (the shell's pid), `?` (the last
/// command's status), and `!` (the process group of the most recent
/// background job). User variables are created with `export` and live in
/// declaration order.
pub struct VarTable {
    vars: Vec<(String, String)>,
}

impl VarTable {
    pub fn new(shell_pid: libc::pid_t) -> Self {
        Self {
            vars: vec![
                ("$".into(), shell_pid.to_string()),
                ("?".into(), "0".into()),
                ("!".into(), String::new()),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Assign an existing variable. Returns false when no such name.
    pub fn set(&mut self, name: &str, value: &str) -> bool {
        match self.vars.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => {
                *v = value.to_string();
                true
            }
            None => false,
        }
    }

    /// Declare a new variable with an empty value.
    pub fn export(&mut self, name: &str) {
        self.vars.push((name.to_string(), String::new()));
    }

    /// Remove a variable. Returns false when no such name.
    pub fn unexport(&mut self, name: &str) -> bool {
        match self.vars.iter().position(|(n, _)| n == name) {
            Some(index) => {
                self.vars.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn set_status(&mut self, status: i32) {
        self.put("?", &status.to_string());
    }

    pub fn status(&self) -> i32 {
        self.get("?").and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    pub fn set_last_bg_pgid(&mut self, pgid: libc::pid_t) {
        self.put("!", &pgid.to_string());
    }

    fn put(&mut self, name: &str, value: &str) {
        if !self.set(name, value) {
            self.vars.push((name.to_string(), value.to_string()));
        }
    }

    /// Replace every `$name` in a raw command line with the variable's
    /// value, before any parsing.
    ///
    /// A name runs to the next blank, `#`, or end of line. An unknown name
    /// substitutes nothing and is reported. A `$` followed by a blank,
    /// `#`, or end of line stays literal.
    pub fn substitute(&self, line: &str) -> String {
        let mut out = String::with_capacity(line.len());
        let mut rest = line;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let end = after
                .find(|c: char| c.is_whitespace() || c == '#')
                .unwrap_or(after.len());

            if end == 0 {
                out.push('$');
                rest = after;
                continue;
            }

            let name = &after[..end];
            match self.get(name) {
                Some(value) => out.push_str(value),
                None => println!("-xssh: Does not exist variable ${name}."),
            }
            rest = &after[end..];
        }

        out.push_str(rest);
        out
    }
}
