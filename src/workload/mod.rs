//! Workload submission
//!
//! Definitions come from a remote URL or a local file. The TaskRun is a
//! minijinja template rendered with the output image reference before it is
//! applied; the rendered copy is left in the scratch directory so a failed
//! run can be inspected.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use minijinja::{context, Environment, UndefinedBehavior};
use tracing::info;

use crate::observer::ClusterControl;
use crate::{Error, Result};

/// Placeholder the TaskRun template must use for the output image
pub const IMAGE_NAME_VAR: &str = "image_name";

/// Where a definition is read from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DefinitionSource {
    /// Remote http(s) URL
    Url(String),
    /// Local file
    File(PathBuf),
}

impl DefinitionSource {
    /// Classify a location string: http(s) URLs are remote, anything else a path
    pub fn parse(location: &str) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(location.to_string())
        } else {
            Self::File(PathBuf::from(location))
        }
    }

    /// The location as passed to the control API
    pub fn location(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::File(path) => path.to_string_lossy().to_string(),
        }
    }
}

impl fmt::Display for DefinitionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location())
    }
}

/// Fully qualified image reference: `host:port/repository`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry host
    pub host: String,
    /// Registry port
    pub port: u16,
    /// Repository path
    pub repository: String,
}

impl ImageRef {
    /// Create an image reference
    pub fn new(host: impl Into<String>, port: u16, repository: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            repository: repository.into(),
        }
    }

    /// Same repository and port, different host
    pub fn with_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.repository)
    }
}

/// Render `template` with the image reference substituted for `image_name`.
///
/// Fails if the template never mentions the placeholder (the TaskRun would
/// push to whatever image was hardcoded) or references anything else.
pub fn render_template(template: &str, image: &ImageRef) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_template("definition", template)?;
    let tmpl = env.get_template("definition")?;

    if !tmpl.undeclared_variables(false).contains(IMAGE_NAME_VAR) {
        return Err(Error::template(format!(
            "template has no '{{{{ {} }}}}' placeholder",
            IMAGE_NAME_VAR
        )));
    }

    Ok(tmpl.render(context! { image_name => image.to_string() })?)
}

/// Render the template at `template_path` into a new `taskrun.*.yml` in `dir`.
///
/// Returns the path of the rendered file.
pub fn render_definition(template_path: &Path, image: &ImageRef, dir: &Path) -> Result<PathBuf> {
    let template = std::fs::read_to_string(template_path).map_err(|e| {
        Error::io(format!("reading template {}", template_path.display()), e)
    })?;
    let rendered = render_template(&template, image)?;

    let mut file = tempfile::Builder::new()
        .prefix("taskrun.")
        .suffix(".yml")
        .tempfile_in(dir)
        .map_err(|e| Error::io("creating rendered definition", e))?;
    file.write_all(rendered.as_bytes())
        .map_err(|e| Error::io("writing rendered definition", e))?;

    let (_, path) = file
        .keep()
        .map_err(|e| Error::io("persisting rendered definition", e.error))?;
    Ok(path)
}

/// Submits definitions to one namespace of a cluster
pub struct WorkloadDriver<'a, C: ?Sized> {
    control: &'a C,
    namespace: String,
}

impl<'a, C: ClusterControl + ?Sized> WorkloadDriver<'a, C> {
    /// Create a driver targeting `namespace`
    pub fn new(control: &'a C, namespace: impl Into<String>) -> Self {
        Self {
            control,
            namespace: namespace.into(),
        }
    }

    /// Apply `source`. Any failure is a [`Error::DefinitionRejected`]; it is
    /// never retried since a bad definition does not fix itself.
    pub async fn submit(&self, source: &DefinitionSource) -> Result<()> {
        let location = source.location();
        info!(source = %location, namespace = %self.namespace, "Submitting definition");

        match self.control.apply_definition(&location, &self.namespace).await {
            Ok(output) => {
                for line in output.lines().filter(|l| !l.trim().is_empty()) {
                    info!("{}", line.trim());
                }
                Ok(())
            }
            Err(e @ Error::DefinitionRejected { .. }) => Err(e),
            Err(e) => Err(Error::definition_rejected(location, e.to_string())),
        }
    }

    /// Render the template at `template_path` into `dir` and submit it
    ///
    /// Returns the rendered file's path.
    pub async fn submit_template(
        &self,
        template_path: &Path,
        image: &ImageRef,
        dir: &Path,
    ) -> Result<PathBuf> {
        let rendered = render_definition(template_path, image, dir)?;
        info!(file = %rendered.display(), image = %image, "Rendered definition");
        self.submit(&DefinitionSource::File(rendered.clone())).await?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::MockClusterControl;
    use mockall::predicate::*;

    const TASKRUN_TEMPLATE: &str = "apiVersion: tekton.dev/v1beta1\n\
kind: TaskRun\n\
metadata:\n  name: test-run\n\
spec:\n  params:\n  - name: APP_IMAGE\n    value: {{ image_name }}\n";

    fn image() -> ImageRef {
        ImageRef::new("192.168.1.20", 41000, "integration-test/app")
    }

    // ==========================================================================
    // Story: definition sources
    // ==========================================================================

    #[test]
    fn urls_and_paths_are_distinguished() {
        assert_eq!(
            DefinitionSource::parse("https://example.com/task.yaml"),
            DefinitionSource::Url("https://example.com/task.yaml".to_string())
        );
        assert_eq!(
            DefinitionSource::parse("HTTP://example.com/task.yaml"),
            DefinitionSource::Url("HTTP://example.com/task.yaml".to_string())
        );
        assert_eq!(
            DefinitionSource::parse("./buildpacks.yaml"),
            DefinitionSource::File(PathBuf::from("./buildpacks.yaml"))
        );
    }

    #[test]
    fn image_ref_formats_host_port_repository() {
        assert_eq!(image().to_string(), "192.168.1.20:41000/integration-test/app");
        assert_eq!(
            image().with_host("localhost").to_string(),
            "localhost:41000/integration-test/app"
        );
    }

    // ==========================================================================
    // Story: rendering the TaskRun
    // ==========================================================================

    #[test]
    fn template_receives_image_reference() {
        let rendered = render_template(TASKRUN_TEMPLATE, &image()).unwrap();
        assert!(rendered.contains("value: 192.168.1.20:41000/integration-test/app"));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let err = render_template("kind: TaskRun\n", &image()).unwrap_err();
        assert!(err.to_string().contains("image_name"));
    }

    #[test]
    fn template_with_unknown_variable_fails() {
        let err =
            render_template("{{ image_name }} {{ registry_token }}", &image()).unwrap_err();
        assert!(matches!(err, Error::Template { .. }));
    }

    #[test]
    fn rendered_file_lands_in_scratch_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let template_path = scratch.path().join("taskrun.tmpl.yaml");
        std::fs::write(&template_path, TASKRUN_TEMPLATE).unwrap();

        let path = render_definition(&template_path, &image(), scratch.path()).unwrap();

        assert_eq!(path.parent(), Some(scratch.path()));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("taskrun.") && name.ends_with(".yml"));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("192.168.1.20:41000/integration-test/app"));
    }

    #[test]
    fn missing_template_is_an_io_error() {
        let scratch = tempfile::tempdir().unwrap();
        let err = render_definition(
            &scratch.path().join("nope.yaml"),
            &image(),
            scratch.path(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    // ==========================================================================
    // Story: submission
    // ==========================================================================

    #[tokio::test]
    async fn submit_applies_location_to_namespace() {
        let mut control = MockClusterControl::new();
        control
            .expect_apply_definition()
            .with(eq("https://example.com/task.yaml"), eq("default"))
            .times(1)
            .returning(|_, _| Ok("task.tekton.dev/buildpacks created".to_string()));

        let driver = WorkloadDriver::new(&control, "default");
        driver
            .submit(&DefinitionSource::parse("https://example.com/task.yaml"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejection_is_surfaced_without_retry() {
        let mut control = MockClusterControl::new();
        control
            .expect_apply_definition()
            .times(1)
            .returning(|loc, _| {
                Err(Error::definition_rejected(
                    loc,
                    "error validating data: unknown field \"spec.foo\"",
                ))
            });

        let driver = WorkloadDriver::new(&control, "default");
        let err = driver
            .submit(&DefinitionSource::parse("task.yaml"))
            .await
            .unwrap_err();

        match err {
            Error::DefinitionRejected { location, message } => {
                assert_eq!(location, "task.yaml");
                assert!(message.contains("unknown field"));
            }
            other => panic!("expected DefinitionRejected, got {other}"),
        }
    }

    #[tokio::test]
    async fn other_apply_failures_become_rejections() {
        let mut control = MockClusterControl::new();
        control
            .expect_apply_definition()
            .times(1)
            .returning(|_, _| {
                Err(Error::io(
                    "running kubectl",
                    std::io::Error::new(std::io::ErrorKind::NotFound, "kubectl not found"),
                ))
            });

        let driver = WorkloadDriver::new(&control, "default");
        let err = driver
            .submit(&DefinitionSource::parse("task.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DefinitionRejected { .. }));
    }

    #[tokio::test]
    async fn submit_template_applies_the_rendered_file() {
        let scratch = tempfile::tempdir().unwrap();
        let template_path = scratch.path().join("taskrun.tmpl.yaml");
        std::fs::write(&template_path, TASKRUN_TEMPLATE).unwrap();

        let mut control = MockClusterControl::new();
        control
            .expect_apply_definition()
            .withf(|location, namespace| {
                namespace == "default"
                    && std::fs::read_to_string(location)
                        .map(|c| c.contains("192.168.1.20:41000/integration-test/app"))
                        .unwrap_or(false)
            })
            .times(1)
            .returning(|_, _| Ok("taskrun.tekton.dev/test-run created".to_string()));

        let driver = WorkloadDriver::new(&control, "default");
        let rendered = driver
            .submit_template(&template_path, &image(), scratch.path())
            .await
            .unwrap();
        assert!(rendered.exists());
    }
}
