//! Route path construction shared by inbound routes and outbound calls.

/// Builds the routable path for an operation.
///
/// Without an explicit path the result is `base/service/version/operation`.
/// With one, the explicit path is appended verbatim to `base/service/version`,
/// so the caller supplies its leading `/`.
#[must_use]
pub fn build_url(
    base_path: &str,
    service_name: &str,
    service_version: &str,
    operation_name: &str,
    explicit_path: Option<&str>,
) -> String {
    match explicit_path {
        Some(path) => format!("{base_path}/{service_name}/{service_version}{path}"),
        None => format!("{base_path}/{service_name}/{service_version}/{operation_name}"),
    }
}
