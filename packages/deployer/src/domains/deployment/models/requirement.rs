use crate::domains::deployment::errors::AppError;

use super::environment::EnvironmentConfig;

/// A desired environment configuration plus what the store found about it.
///
/// Built by the consistency checks on the apps store, consumed by [`App`]
/// operations. The default value means "nothing to check" and is what the
/// update path returns for a slot that is not changing.
///
/// [`App`]: super::app::App
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentConfigRequirement {
    config: Option<EnvironmentConfig>,
    target_found: bool,
    name_available: bool,
}

impl EnvironmentConfigRequirement {
    pub fn new(config: EnvironmentConfig, target_found: bool, name_available: bool) -> Self {
        Self {
            config: Some(config),
            target_found,
            name_available,
        }
    }

    /// Whether this requirement carries nothing to check.
    pub fn is_empty(&self) -> bool {
        self.config.is_none()
    }

    pub fn config(&self) -> Option<&EnvironmentConfig> {
        self.config.as_ref()
    }

    /// The target exists and is not marked for cleanup.
    pub fn target_found(&self) -> bool {
        self.target_found
    }

    /// No other app with the same name is bound to the target.
    pub fn name_available(&self) -> bool {
        self.name_available
    }

    /// The configuration, if both checks passed.
    ///
    /// A missing target wins over a taken name: there is nothing to be
    /// unique on.
    pub fn met(self) -> Result<EnvironmentConfig, AppError> {
        let config = self.config.ok_or(AppError::ConfigRequired)?;

        if !self.target_found {
            return Err(AppError::TargetNotFound {
                target: config.target(),
            });
        }

        if !self.name_available {
            return Err(AppError::NameAlreadyTaken {
                target: config.target(),
            });
        }

        Ok(config)
    }
}
