//! Per-venue module switches
//!
//! Handlers ask [`FeatureFlags`] before doing any work and answer
//! `FEATURE_DISABLED` for a switched-off module.

use shared::error::AppError;
use std::collections::HashSet;

/// Modules that can be switched off per venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Module {
    Inventory,
    Recipes,
    Pos,
    Kds,
    Observability,
    Payroll,
}

impl Module {
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Inventory => "inventory",
            Module::Recipes => "recipes",
            Module::Pos => "pos",
            Module::Kds => "kds",
            Module::Observability => "observability",
            Module::Payroll => "payroll",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inventory" => Some(Module::Inventory),
            "recipes" => Some(Module::Recipes),
            "pos" => Some(Module::Pos),
            "kds" => Some(Module::Kds),
            "observability" => Some(Module::Observability),
            "payroll" => Some(Module::Payroll),
            _ => None,
        }
    }
}

pub trait FeatureFlags: Send + Sync {
    fn is_enabled(&self, venue_id: &str, module: Module) -> bool;

    fn require(&self, venue_id: &str, module: Module) -> Result<(), AppError> {
        if self.is_enabled(venue_id, module) {
            Ok(())
        } else {
            Err(AppError::feature_disabled(module.as_str()))
        }
    }
}

/// Static switches from `DISABLED_MODULES`
///
/// Entries are `venue:module`, comma separated; `*` as venue disables the
/// module everywhere.
#[derive(Debug, Clone, Default)]
pub struct StaticFlags {
    disabled: HashSet<(String, Module)>,
}

impl StaticFlags {
    pub fn parse(raw: &str) -> Self {
        let mut disabled = HashSet::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((venue, module)) = entry.split_once(':') else {
                tracing::warn!(entry, "Ignoring malformed DISABLED_MODULES entry");
                continue;
            };
            match Module::parse(module) {
                Some(m) => {
                    disabled.insert((venue.trim().to_string(), m));
                }
                None => tracing::warn!(entry, "Unknown module in DISABLED_MODULES"),
            }
        }
        Self { disabled }
    }
}

impl FeatureFlags for StaticFlags {
    fn is_enabled(&self, venue_id: &str, module: Module) -> bool {
        !self.disabled.contains(&(venue_id.to_string(), module))
            && !self.disabled.contains(&("*".to_string(), module))
    }
}
