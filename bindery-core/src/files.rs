// Uploaded-file assignment for multipart bodies

use crate::{Error, HttpRequest, Registry, Target};

/// Copy the files of the request's parsed multipart form into `target`.
///
/// Members are declared with `Shape::file` (first upload under the form
/// name) and `Shape::files` (every upload). Members whose form name has no
/// uploads are left as they are, and a target without file members is a
/// no-op.
///
/// Fails with [`Error::InvalidArgument`] when the request carries no parsed
/// multipart form.
pub fn populate_files(
    registry: &Registry,
    req: &HttpRequest,
    target: &mut dyn Target,
) -> Result<(), Error> {
    let form = req.multipart_form().ok_or_else(|| {
        Error::InvalidArgument("no multipart form on request to populate files from".to_string())
    })?;

    let attached = target.attach_files(registry, form);
    if attached > 0 {
        tracing::trace!(
            target_type = target.type_name(),
            members = attached,
            "attached uploaded files"
        );
    }
    Ok(())
}
