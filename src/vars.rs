use std::collections::HashMap;
use std::env;
use std::ffi::CString;

use thiserror::Error;

/// A single shell variable. `exported` entries appear in the environment
/// block handed to executed programs; `readonly` entries refuse mutation.
#[derive(Debug, Clone)]
pub struct Var {
    pub value: String,
    pub exported: bool,
    pub readonly: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VarError {
    #[error("{0}: readonly variable")]
    Readonly(String),
}

/// The shell's name→value store. Owned by the shell context; never a global.
#[derive(Debug, Default)]
pub struct VarTable {
    vars: HashMap<String, Var>,
}

impl VarTable {
    pub fn new() -> Self {
        VarTable::default()
    }

    /// Seeds the table from the inherited process environment. Everything a
    /// shell inherits starts out exported.
    pub fn from_process_env() -> Self {
        let mut table = VarTable::new();
        for (name, value) in env::vars() {
            table.vars.insert(
                name,
                Var {
                    value,
                    exported: true,
                    readonly: false,
                },
            );
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|v| v.value.as_str())
    }

    pub fn set(&mut self, name: &str, value: &str, export: bool) -> Result<(), VarError> {
        match self.vars.get_mut(name) {
            Some(var) if var.readonly => Err(VarError::Readonly(name.to_string())),
            Some(var) => {
                var.value = value.to_string();
                var.exported |= export;
                Ok(())
            }
            None => {
                self.vars.insert(
                    name.to_string(),
                    Var {
                        value: value.to_string(),
                        exported: export,
                        readonly: false,
                    },
                );
                Ok(())
            }
        }
    }

    /// Marks an existing variable exported; creates it empty if absent.
    pub fn export(&mut self, name: &str) -> Result<(), VarError> {
        match self.vars.get_mut(name) {
            Some(var) if var.readonly => Err(VarError::Readonly(name.to_string())),
            Some(var) => {
                var.exported = true;
                Ok(())
            }
            None => self.set(name, "", true),
        }
    }

    pub fn unset(&mut self, name: &str) -> Result<(), VarError> {
        match self.vars.get(name) {
            Some(var) if var.readonly => Err(VarError::Readonly(name.to_string())),
            _ => {
                self.vars.remove(name);
                Ok(())
            }
        }
    }

    /// Builds the `NAME=VALUE` environment block for `execve`: exported
    /// entries only, so executed programs see exactly what the shell exports
    /// rather than whatever this process happened to inherit.
    pub fn build_envp(&self) -> Vec<CString> {
        let mut envp = Vec::with_capacity(self.vars.len());
        for (name, var) in &self.vars {
            if !var.exported {
                continue;
            }
            if let Ok(entry) = CString::new(format!("{}={}", name, var.value)) {
                envp.push(entry);
            }
        }
        envp
    }

    /// Substitutes `$?` and `$NAME` in a raw input line before it is parsed.
    /// Single-quoted regions are left untouched; unset names expand to "".
    pub fn expand_line(&self, input: &str, last_status: i32) -> String {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut in_single = false;
        while let Some(c) = chars.next() {
            match c {
                '\'' => {
                    in_single = !in_single;
                    out.push(c);
                }
                '$' if !in_single => match chars.peek() {
                    Some('?') => {
                        chars.next();
                        out.push_str(&last_status.to_string());
                    }
                    Some(&c2) if c2.is_ascii_alphabetic() || c2 == '_' => {
                        let mut name = String::new();
                        while let Some(&c3) = chars.peek() {
                            if c3.is_ascii_alphanumeric() || c3 == '_' {
                                name.push(c3);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        if let Some(value) = self.get(&name) {
                            out.push_str(value);
                        }
                    }
                    _ => out.push('$'),
                },
                _ => out.push(c),
            }
        }
        out
    }

    /// Marks a variable readonly. Used for the handful of names the shell
    /// refuses to clobber.
    pub fn set_readonly(&mut self, name: &str) {
        if let Some(var) = self.vars.get_mut(name) {
            var.readonly = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> VarTable {
        let mut t = VarTable::new();
        t.set("HOME", "/home/u", true).unwrap();
        t.set("LOCAL", "x", false).unwrap();
        t
    }

    #[test]
    fn envp_contains_only_exported_entries() {
        let t = table();
        let envp = t.build_envp();
        let entries: Vec<&str> = envp.iter().map(|c| c.to_str().unwrap()).collect();
        assert!(entries.contains(&"HOME=/home/u"));
        assert!(!entries.iter().any(|e| e.starts_with("LOCAL=")));
    }

    #[test]
    fn export_promotes_existing_variable() {
        let mut t = table();
        t.export("LOCAL").unwrap();
        let envp = t.build_envp();
        assert!(envp.iter().any(|c| c.to_str().unwrap() == "LOCAL=x"));
    }

    #[test]
    fn readonly_refuses_set_and_unset() {
        let mut t = table();
        t.set_readonly("HOME");
        assert_eq!(
            t.set("HOME", "/other", true),
            Err(VarError::Readonly("HOME".into()))
        );
        assert_eq!(t.unset("HOME"), Err(VarError::Readonly("HOME".into())));
        assert_eq!(t.get("HOME"), Some("/home/u"));
    }

    #[test]
    fn expands_status_and_names() {
        let t = table();
        assert_eq!(t.expand_line("echo $?", 42), "echo 42");
        assert_eq!(t.expand_line("echo $HOME/x", 0), "echo /home/u/x");
        assert_eq!(t.expand_line("echo $MISSING.", 0), "echo .");
    }

    #[test]
    fn single_quotes_suppress_expansion() {
        let t = table();
        assert_eq!(t.expand_line("echo '$HOME' $HOME", 0), "echo '$HOME' /home/u");
    }

    #[test]
    fn lone_dollar_is_literal() {
        let t = table();
        assert_eq!(t.expand_line("echo $ end", 0), "echo $ end");
    }
}
