//! Configuration for lstore
//!
//! The device build flags become plain runtime values so one binary can run
//! with the log store (or its fast-forward index) on or off.

/// Default page / erase-unit size (`JD_FLASH_PAGE_SIZE`)
pub const DEFAULT_PAGE_SIZE: usize = 2048;

/// Default region size (`JD_LSTORE_FILE_SIZE`)
pub const DEFAULT_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// Build target, mirrors the native / web-sandbox split of the device config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    Native,
    /// Sandboxed web build: no backing storage, log store disabled
    WebSandbox,
}

// =============================================================================
// Store Configuration
// =============================================================================

/// Configuration for a single `LogStore` instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Master switch (`JD_LSTORE`); `open` fails with `InitError::Disabled` when off
    pub enabled: bool,

    /// Maintain the in-memory fast-forward index (`JD_LSTORE_FF`)
    pub fast_forward: bool,

    /// Total region size in bytes (`JD_LSTORE_FILE_SIZE`)
    pub file_size: u64,

    /// Page / erase-unit size in bytes (`JD_FLASH_PAGE_SIZE`)
    pub page_size: usize,

    /// Run a reclamation pass when `append` finds no erased page.
    /// When off, a full store fails fast with `StoreFull`.
    pub reclaim_on_full: bool,

    /// Sync the medium after every append
    pub sync_on_append: bool,

    /// Include raw header bytes in corruption diagnostics (`JD_VERBOSE_ASSERT`)
    pub verbose: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fast_forward: false,
            file_size: DEFAULT_FILE_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            reclaim_on_full: true,
            sync_on_append: true,
            verbose: false,
        }
    }
}

impl StoreConfig {
    /// Create a new config builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }
}

/// Builder for StoreConfig
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Enable or disable the store entirely
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Enable or disable the fast-forward index
    pub fn fast_forward(mut self, enabled: bool) -> Self {
        self.config.fast_forward = enabled;
        self
    }

    /// Set the total region size (in bytes)
    pub fn file_size(mut self, size: u64) -> Self {
        self.config.file_size = size;
        self
    }

    /// Set the page size (in bytes)
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set whether a full store reclaims before failing
    pub fn reclaim_on_full(mut self, enabled: bool) -> Self {
        self.config.reclaim_on_full = enabled;
        self
    }

    /// Set whether every append syncs the medium
    pub fn sync_on_append(mut self, enabled: bool) -> Self {
        self.config.sync_on_append = enabled;
        self
    }

    /// Set verbose corruption diagnostics
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.config.verbose = enabled;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}

// =============================================================================
// Device Configuration
// =============================================================================

/// The full device configuration surface.
///
/// Only `lstore` is consumed by this crate. The remaining flags gate
/// subsystems that live elsewhere (bus client, telemetry) and are carried so
/// a device profile can be described in one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Bus-client role (`JD_CLIENT`)
    pub client: bool,

    /// Status telemetry (`JD_CONFIG_STATUS`)
    pub status: bool,

    /// Control flood telemetry (`JD_CONFIG_CONTROL_FLOOD`)
    pub control_flood: bool,

    /// Temperature telemetry (`JD_CONFIG_TEMPERATURE`)
    pub temperature: bool,

    /// Detailed assertion diagnostics (`JD_VERBOSE_ASSERT`)
    pub verbose_assert: bool,

    /// Log store settings
    pub lstore: StoreConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::for_target(Target::Native)
    }
}

impl DeviceConfig {
    /// Device profile for the given build target
    pub fn for_target(target: Target) -> Self {
        let lstore = match target {
            Target::Native => StoreConfig::default(),
            Target::WebSandbox => StoreConfig {
                enabled: false,
                ..StoreConfig::default()
            },
        };

        Self {
            client: true,
            status: false,
            control_flood: false,
            temperature: false,
            verbose_assert: true,
            lstore,
        }
    }

    /// Page size shared by every flash consumer on the device
    pub fn flash_page_size(&self) -> usize {
        self.lstore.page_size
    }

    /// Store configuration with device-wide diagnostics applied
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            verbose: self.lstore.verbose || self.verbose_assert,
            ..self.lstore.clone()
        }
    }
}
