//! Building blocks for baking container images into GCE disk images.
//!
//! A [`Request`] describes the image to create. A [`DiskImageBuilder`]
//! carries it out; [`CommandBuilder`] does so by handing the request to an
//! external builder program.

use std::future::Future;

pub mod command;
pub mod context;
pub mod duration;
pub mod request;

pub use command::CommandBuilder;
pub use context::BuildContext;
pub use request::{ImagePullAuth, Request, RequestBuilder};

/// Machinery that turns a [`Request`] into a disk image.
///
/// The call returns once the image exists or the build has failed. It may
/// run far longer than [`Request::timeout`], which bounds individual steps
/// of the build rather than the whole.
pub trait DiskImageBuilder {
    fn generate_disk_image(
        &self,
        ctx: &BuildContext,
        request: Request,
    ) -> impl Future<Output = anyhow::Result<()>>;
}
