//! Interfaces the host loader hands to the lifecycle core.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::dispatch::MessageDispatcher;

/// Message channel of an extension embedded in the study add-on.
pub trait ExtensionChannel: Send + Sync {
    /// Route `{shield: true, ...}` messages to `dispatcher` from now on.
    fn connect(&self, dispatcher: MessageDispatcher);

    /// Stop routing messages. Called when the install is released.
    fn disconnect(&self) {}
}

/// Install metadata delivered with every lifecycle event.
#[derive(Clone, Default)]
pub struct InstallMetadata {
    pub id: String,
    pub version: String,
    pub install_path: PathBuf,
    pub resource_uri: String,
    pub instance_id: String,
    pub embedded_extension: Option<Arc<dyn ExtensionChannel>>,
}

impl InstallMetadata {
    #[must_use]
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_extension(mut self, channel: Arc<dyn ExtensionChannel>) -> Self {
        self.embedded_extension = Some(channel);
        self
    }
}

impl fmt::Debug for InstallMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallMetadata")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("install_path", &self.install_path)
            .field("resource_uri", &self.resource_uri)
            .field("instance_id", &self.instance_id)
            .field("embedded_extension", &self.embedded_extension.is_some())
            .finish()
    }
}
