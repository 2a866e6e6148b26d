use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Default size of the staging disk that hosts the unpacked images.
pub const DEFAULT_DISK_SIZE_GB: u64 = 10;

/// Default budget for each step of the build.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Mechanism used to authenticate when pulling container images during the
/// build.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
pub enum ImagePullAuth {
    /// The images are publicly available and no authentication is required
    /// to pull them.
    #[default]
    #[strum(to_string = "None", serialize = "")]
    None,

    /// The service account OAuth token of the build VM is used to pull the
    /// images.
    ServiceAccountToken,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid image pull auth {value:?}, valid values are [{}]", ImagePullAuth::valid_values())]
pub struct ParseImagePullAuthError {
    pub value: String,
}

impl ImagePullAuth {
    /// Parse a command line value. The empty string is an alias for `None`.
    pub fn from_flag(value: &str) -> Result<Self, ParseImagePullAuthError> {
        value.parse().map_err(|_| ParseImagePullAuthError {
            value: value.to_string(),
        })
    }

    /// Comma separated list of accepted values, for diagnostics.
    pub fn valid_values() -> String {
        Self::iter()
            .map(|auth| auth.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Everything the image builder needs to produce a disk image.
///
/// Requests are immutable once built; use [`Request::builder`] to create
/// one. The serialized form is what external builder programs receive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    image_name: String,
    project_name: String,
    zone: String,
    gcs_path: String,
    disk_size_gb: u64,
    gcp_oauth: Option<PathBuf>,
    container_images: Vec<String>,
    #[serde(with = "crate::duration::as_go_string")]
    timeout: Duration,
    image_pull_auth: ImagePullAuth,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Name of the image that will be generated.
    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    /// GCP project where the build resources are created.
    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Zone for the transient build resources.
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// GCS location for the build logs.
    pub fn gcs_path(&self) -> &str {
        &self.gcs_path
    }

    pub fn disk_size_gb(&self) -> u64 {
        self.disk_size_gb
    }

    /// Service account credential file, if one was given.
    pub fn gcp_oauth(&self) -> Option<&PathBuf> {
        self.gcp_oauth.as_ref()
    }

    /// Container images to bake into the disk, in the order given.
    pub fn container_images(&self) -> &[String] {
        &self.container_images
    }

    /// Timeout applied to each step of the build, not the build as a whole.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn image_pull_auth(&self) -> ImagePullAuth {
        self.image_pull_auth
    }

    /// Fully qualified name of the image this request creates.
    pub fn image_resource(&self) -> String {
        format!(
            "projects/{}/global/images/{}",
            self.project_name, self.image_name
        )
    }
}

/// Assembles a [`Request`]. Anything left unset keeps its default.
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    request: Request,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            request: Request {
                image_name: String::new(),
                project_name: String::new(),
                zone: String::new(),
                gcs_path: String::new(),
                disk_size_gb: DEFAULT_DISK_SIZE_GB,
                gcp_oauth: None,
                container_images: Vec::new(),
                timeout: DEFAULT_TIMEOUT,
                image_pull_auth: ImagePullAuth::default(),
            },
        }
    }
}

impl RequestBuilder {
    pub fn image_name(mut self, image_name: impl Into<String>) -> Self {
        self.request.image_name = image_name.into();
        self
    }

    pub fn project_name(mut self, project_name: impl Into<String>) -> Self {
        self.request.project_name = project_name.into();
        self
    }

    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.request.zone = zone.into();
        self
    }

    pub fn gcs_path(mut self, gcs_path: impl Into<String>) -> Self {
        self.request.gcs_path = gcs_path.into();
        self
    }

    pub fn disk_size_gb(mut self, disk_size_gb: u64) -> Self {
        self.request.disk_size_gb = disk_size_gb;
        self
    }

    pub fn gcp_oauth(mut self, gcp_oauth: Option<PathBuf>) -> Self {
        self.request.gcp_oauth = gcp_oauth;
        self
    }

    /// Append one container image.
    pub fn container_image(mut self, image: impl Into<String>) -> Self {
        self.request.container_images.push(image.into());
        self
    }

    /// Append container images, preserving their order.
    pub fn container_images<I, S>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request
            .container_images
            .extend(images.into_iter().map(Into::into));
        self
    }

    /// Timeouts above [`crate::duration::MAX_DURATION`] cannot be encoded and make the
    /// request fail to serialize.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = timeout;
        self
    }

    pub fn image_pull_auth(mut self, image_pull_auth: ImagePullAuth) -> Self {
        self.request.image_pull_auth = image_pull_auth;
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}
