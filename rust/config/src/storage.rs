//! Checkpoint retention and blob upload settings.

use serde::{Deserialize, Serialize};

/// What happens to `model_<N>.pt` files after each save.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct CheckpointPolicy {
    /// Delete every other checkpoint in the run directory after a save.
    #[serde(default = "default_true")]
    #[cfg_attr(
        feature = "clap",
        arg(long, default_value = "true", action = clap::ArgAction::Set)
    )]
    pub delete_old_models: bool,
    /// Upload saved checkpoints to blob storage.
    #[serde(default = "default_true")]
    #[cfg_attr(
        feature = "clap",
        arg(long, default_value = "true", action = clap::ArgAction::Set)
    )]
    pub upload_models: bool,
    /// Only upload checkpoints whose number is a multiple of this.
    #[serde(default = "default_upload_every")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "10"))]
    pub upload_every: u64,
}

fn default_true() -> bool {
    true
}
fn default_upload_every() -> u64 {
    10
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            delete_old_models: true,
            upload_models: true,
            upload_every: default_upload_every(),
        }
    }
}

impl CheckpointPolicy {
    /// Whether checkpoint `epoch` is due for upload.
    ///
    /// An interval of zero never uploads.
    #[must_use]
    pub fn should_upload(&self, epoch: u64) -> bool {
        self.upload_models && self.upload_every != 0 && epoch % self.upload_every == 0
    }
}

/// Blob container that receives uploaded checkpoints.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct BlobSettings {
    /// Storage account endpoint, e.g. `https://acct.blob.core.windows.net`.
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "", env = "STYLEGAN2_ACCOUNT_URL"))]
    pub account_url: String,
    /// SAS token used to authorise uploads.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[cfg_attr(
        feature = "clap",
        arg(long, default_value = "", env = "STYLEGAN2_CREDENTIAL", hide_env_values = true)
    )]
    pub credential: String,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "", env = "STYLEGAN2_CONTAINER_NAME"))]
    pub container_name: String,
}

impl std::fmt::Debug for BlobSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobSettings")
            .field("account_url", &self.account_url)
            .field(
                "credential",
                &if self.credential.is_empty() { "" } else { "<redacted>" },
            )
            .field("container_name", &self.container_name)
            .finish()
    }
}
