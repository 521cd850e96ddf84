//! Session-wide world settings
//!
//! The map and environment are shared by every stream connection. Both start
//! from the config file and can be replaced by clients at any time.

use log::info;

/// Process-wide session settings every connection reads on admission
#[derive(Debug, Clone, Default)]
pub struct World {
    map: String,
    environment: String,
}

impl World {
    pub fn new(map: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            map: map.into(),
            environment: environment.into(),
        }
    }

    /// Current map, `None` until a client or the config supplies one
    pub fn map(&self) -> Option<&str> {
        if self.map.is_empty() {
            None
        } else {
            Some(&self.map)
        }
    }

    pub fn set_map(&mut self, map: impl Into<String>) {
        self.map = map.into();
        info!("Setting map to: {}", self.map);
    }

    pub fn environment(&self) -> Option<&str> {
        if self.environment.is_empty() {
            None
        } else {
            Some(&self.environment)
        }
    }

    pub fn set_environment(&mut self, environment: impl Into<String>) {
        self.environment = environment.into();
        info!("Setting environment to: {}", self.environment);
    }
}
