use clap::{ArgAction, Parser};
use disk_image_builder::{
    ImagePullAuth, Request,
    command::DEFAULT_PROGRAM,
    duration::{ParseDurationError, parse_duration},
    request::{DEFAULT_DISK_SIZE_GB, ParseImagePullAuthError},
};
use std::path::PathBuf;

pub mod generate;

const IMAGE_PULL_AUTH_HELP: &str = "Auth mechanism to pull the container images, valid values: [None, ServiceAccountToken].
None means that the images are publicly available and no authentication is required to pull them.
ServiceAccountToken means the service account OAuth token will be used to pull the images.
For more information refer to https://cloud.google.com/compute/docs/access/authenticate-workloads#applications";

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CommandLine {
    /// Name of the GCP project where the image will be created
    #[clap(long)]
    pub project_name: Option<String>,

    /// Name of the image that will be generated
    #[clap(long)]
    pub image_name: Option<String>,

    /// Zone where the temporary build resources are created
    #[clap(long)]
    pub zone: Option<String>,

    /// GCS location to dump the build logs
    #[clap(long)]
    pub gcs_path: Option<String>,

    /// Size of the disk that hosts the unpacked images
    #[clap(long, default_value_t = DEFAULT_DISK_SIZE_GB)]
    pub disk_size_gb: u64,

    /// Path to a GCP service account credential file
    #[clap(long)]
    pub gcp_oauth: Option<String>,

    /// Auth mechanism to pull the container images [None, ServiceAccountToken]
    #[clap(long, default_value = "None", long_help = IMAGE_PULL_AUTH_HELP)]
    pub image_pull_auth: String,

    /// Timeout for each build step, e.g. 20m or 1h30m
    #[clap(long, default_value = "20m")]
    pub timeout: String,

    /// Container image to include in the disk image. Can be given multiple
    /// times
    #[clap(long = "container-image", action = ArgAction::Append)]
    pub container_images: Vec<String>,

    /// External program that performs the build
    #[clap(long, env = "DISK_IMAGE_BUILDER_PROGRAM", default_value = DEFAULT_PROGRAM)]
    pub builder_program: PathBuf,

    /// Extra argument for the builder program. Can be given multiple times
    #[clap(long = "builder-arg", action = ArgAction::Append, allow_hyphen_values = true)]
    pub builder_args: Vec<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[clap(long, num_args = 0)]
    pub debug: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    #[error("Please specify a valid value for the flag --image-pull-auth: {0}")]
    InvalidImagePullAuth(ParseImagePullAuthError),

    #[error("invalid argument, timeout: {0}")]
    InvalidTimeout(ParseDurationError),
}

/// Validate the command line and assemble the build request.
pub fn parse_args(command_line: &CommandLine) -> Result<Request, ArgsError> {
    let timeout =
        parse_duration(&command_line.timeout).map_err(ArgsError::InvalidTimeout)?;

    let image_pull_auth = ImagePullAuth::from_flag(&command_line.image_pull_auth)
        .map_err(ArgsError::InvalidImagePullAuth)?;

    // An empty path is the same as no credential file
    let gcp_oauth = command_line
        .gcp_oauth
        .as_deref()
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);

    Ok(Request::builder()
        .project_name(command_line.project_name.clone().unwrap_or_default())
        .image_name(command_line.image_name.clone().unwrap_or_default())
        .zone(command_line.zone.clone().unwrap_or_default())
        .gcs_path(command_line.gcs_path.clone().unwrap_or_default())
        .disk_size_gb(command_line.disk_size_gb)
        .gcp_oauth(gcp_oauth)
        .container_images(command_line.container_images.iter().cloned())
        .timeout(timeout)
        .image_pull_auth(image_pull_auth)
        .build())
}
