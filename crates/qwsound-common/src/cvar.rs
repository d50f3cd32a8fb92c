// cvar.rs — dynamic variable tracking
//
// Trimmed to the lookup/registration surface the sound layer consumes;
// console command dispatch and info-string handling live with the host
// engine, not here.

use std::collections::HashMap;

use log::debug;

/// Saved to the host's config file on exit.
pub const CVAR_ARCHIVE: i32 = 1;

/// A console variable.
#[derive(Clone)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub flags: i32,
    pub modified: bool,
    pub value: f32,
}

/// The cvar store: registration-ordered records with an O(1) name index.
#[derive(Default)]
pub struct CvarContext {
    pub cvar_vars: Vec<Cvar>,
    cvar_index: HashMap<String, usize>,
}

impl CvarContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a cvar by name, returning its index.
    pub fn find_var_index(&self, name: &str) -> Option<usize> {
        self.cvar_index.get(name).copied()
    }

    /// Find a cvar by name.
    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.cvar_index.get(name).map(|&idx| &self.cvar_vars[idx])
    }

    /// Get the floating-point value of a cvar. Returns 0 if not found.
    pub fn variable_value(&self, name: &str) -> f32 {
        match self.find_var(name) {
            Some(var) => var.value,
            None => 0.0,
        }
    }

    /// Get the string value of a cvar. Returns "" if not found.
    pub fn variable_string(&self, name: &str) -> &str {
        match self.find_var(name) {
            Some(var) => &var.string,
            None => "",
        }
    }

    /// Get or create a cvar. If it already exists, the value is not changed
    /// but flags are OR'd in.
    pub fn get(&mut self, name: &str, value: &str, flags: i32) -> usize {
        if let Some(&idx) = self.cvar_index.get(name) {
            self.cvar_vars[idx].flags |= flags;
            return idx;
        }

        let idx = self.cvar_vars.len();
        self.cvar_vars.push(Cvar {
            name: name.to_string(),
            string: value.to_string(),
            flags,
            modified: true,
            value: value.parse::<f32>().unwrap_or(0.0),
        });
        self.cvar_index.insert(name.to_string(), idx);
        idx
    }

    /// Set a cvar value, creating it when unknown.
    pub fn set(&mut self, name: &str, value: &str) -> usize {
        let idx = match self.find_var_index(name) {
            Some(idx) => idx,
            None => return self.get(name, value, 0),
        };

        if value == self.cvar_vars[idx].string {
            return idx; // not changed
        }

        debug!("cvar {} = {}", name, value);
        self.cvar_vars[idx].modified = true;
        self.cvar_vars[idx].string = value.to_string();
        self.cvar_vars[idx].value = value.parse::<f32>().unwrap_or(0.0);
        idx
    }

    /// Convenience for numeric sets.
    pub fn set_value(&mut self, name: &str, value: f32) -> usize {
        if value == value.trunc() {
            self.set(name, &format!("{}", value as i32))
        } else {
            self.set(name, &format!("{}", value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_registers_with_default_value() {
        let mut ctx = CvarContext::new();
        ctx.get("s_volume", "0.7", CVAR_ARCHIVE);
        assert_eq!(ctx.variable_value("s_volume"), 0.7);
        assert_eq!(ctx.variable_string("s_volume"), "0.7");
    }

    #[test]
    fn get_on_existing_keeps_value_and_ors_flags() {
        let mut ctx = CvarContext::new();
        ctx.set("s_volume", "0.25");
        let idx = ctx.get("s_volume", "0.7", CVAR_ARCHIVE);
        assert_eq!(ctx.cvar_vars[idx].value, 0.25);
        assert_ne!(ctx.cvar_vars[idx].flags & CVAR_ARCHIVE, 0);
    }

    #[test]
    fn set_value_round_trips_integers_cleanly() {
        let mut ctx = CvarContext::new();
        ctx.set_value("s_doppler", 1.0);
        assert_eq!(ctx.variable_string("s_doppler"), "1");
        ctx.set_value("s_doppler_factor", 1.5);
        assert_eq!(ctx.variable_value("s_doppler_factor"), 1.5);
    }

    #[test]
    fn unknown_cvar_reads_as_zero_and_empty() {
        let ctx = CvarContext::new();
        assert_eq!(ctx.variable_value("nope"), 0.0);
        assert_eq!(ctx.variable_string("nope"), "");
    }
}
