use anyhow::{Context, Result};
use disk_image_builder::{BuildContext, DiskImageBuilder, Request};
use std::io::Write;
use tracing::debug;

/// Hand the request to the builder and report the created image on `out`.
pub async fn run<B, W>(builder: &B, ctx: &BuildContext, request: Request, out: &mut W) -> Result<()>
where
    B: DiskImageBuilder,
    W: Write,
{
    let resource = request.image_resource();
    debug!(request = ?request, "Generating disk image");

    builder
        .generate_disk_image(ctx, request)
        .await
        .context("unable to generate disk image")?;

    writeln!(out, "Image has successfully been created at: {resource}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{CommandLine, parse_args};
    use anyhow::bail;
    use clap::Parser;
    use disk_image_builder::ImagePullAuth;
    use std::{cell::RefCell, time::Duration};

    /// Records every request and optionally fails.
    #[derive(Default)]
    struct FakeBuilder {
        failure: Option<&'static str>,
        requests: RefCell<Vec<Request>>,
    }

    impl DiskImageBuilder for FakeBuilder {
        async fn generate_disk_image(&self, _ctx: &BuildContext, request: Request) -> Result<()> {
            self.requests.borrow_mut().push(request);
            if let Some(failure) = self.failure {
                bail!(failure);
            }
            Ok(())
        }
    }

    fn request(args: &[&str]) -> Request {
        let args = std::iter::once("gke-disk-image-builder").chain(args.iter().copied());
        let command_line = CommandLine::try_parse_from(args).unwrap();
        parse_args(&command_line).unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_success_line() {
        let builder = FakeBuilder::default();
        let mut out = Vec::new();

        run(
            &builder,
            &BuildContext::background(),
            request(&["--project-name=p", "--image-name=i"]),
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Image has successfully been created at: projects/p/global/images/i\n"
        );
        assert_eq!(builder.requests.borrow().len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_failure_prints_nothing() {
        let builder = FakeBuilder {
            failure: Some("quota exceeded"),
            ..Default::default()
        };
        let mut out = Vec::new();

        let error = run(
            &builder,
            &BuildContext::background(),
            request(&["--project-name=p", "--image-name=i"]),
            &mut out,
        )
        .await
        .unwrap_err();

        assert!(out.is_empty());
        assert_eq!(error.to_string(), "unable to generate disk image");
        assert_eq!(error.root_cause().to_string(), "quota exceeded");
    }

    #[test_log::test(tokio::test)]
    async fn test_defaults_reach_builder() {
        let builder = FakeBuilder::default();

        run(&builder, &BuildContext::background(), request(&[]), &mut Vec::new())
            .await
            .unwrap();

        let requests = builder.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].disk_size_gb(), 10);
        assert_eq!(requests[0].timeout(), Duration::from_secs(20 * 60));
        assert_eq!(requests[0].image_pull_auth(), ImagePullAuth::None);
        assert!(requests[0].container_images().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_builder_receives_container_images_in_order() {
        let builder = FakeBuilder::default();

        run(
            &builder,
            &BuildContext::background(),
            request(&[
                "--container-image=nginx",
                "--container-image=redis",
                "--container-image=nginx",
            ]),
            &mut Vec::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            builder.requests.borrow()[0].container_images(),
            ["nginx", "redis", "nginx"]
        );
    }
}
