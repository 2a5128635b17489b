//! Build argument policy shared by every builder.
//!
//! Extra arguments may be scoped with `arch:<arch>:` or `platform:<name>:` prefixes and
//! only apply when the scope matches. Multiple `OVERLAY_CONFIG=` fragments are merged into
//! one value because CMake keeps only the last definition of a cache variable.

use regex::Regex;
use std::sync::LazyLock;

static OVERLAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^OVERLAY_CONFIG=["']?(.*?)["']?$"#).expect("static regex is valid")
});

/// Keeps unscoped arguments and the scoped ones matching `arch`/`platform`, prefix removed.
pub fn filter_conditional(args: &[String], arch: &str, platform: &str) -> Vec<String> {
    args.iter()
        .filter_map(|arg| {
            if let Some(rest) = arg.strip_prefix("arch:") {
                let (scope, value) = rest.split_once(':')?;
                (scope == arch).then(|| value.to_string())
            } else if let Some(rest) = arg.strip_prefix("platform:") {
                let (scope, value) = rest.split_once(':')?;
                (scope == platform).then(|| value.to_string())
            } else {
                Some(arg.clone())
            }
        })
        .collect()
}

/// Collapses every `OVERLAY_CONFIG=` argument into one quoted, space-joined entry.
///
/// Other arguments keep their order; the merged entry goes last.
pub fn merge_overlay_configs(args: Vec<String>) -> Vec<String> {
    let mut overlays = Vec::new();
    let mut merged = Vec::with_capacity(args.len());
    for arg in args {
        match OVERLAY_RE.captures(&arg) {
            Some(caps) => {
                let value = caps.get(1).map_or("", |m| m.as_str()).trim();
                if !value.is_empty() {
                    overlays.push(value.to_string());
                }
            }
            None => merged.push(arg),
        }
    }
    if !overlays.is_empty() {
        merged.push(format!("OVERLAY_CONFIG=\"{}\"", overlays.join(" ")));
    }
    merged
}

/// Turns `KEY=VAL` entries into `-DKEY=VAL`; entries already starting with `-` pass through.
pub fn to_cmake_defines(args: Vec<String>) -> Vec<String> {
    args.into_iter()
        .map(|arg| {
            if arg.starts_with('-') {
                arg
            } else {
                format!("-D{arg}")
            }
        })
        .collect()
}

/// Full CMake argument list for one build.
///
/// `sources` are concatenated in order (scenario args first, then run-wide args), filtered
/// for the target, followed by the extra config overlay if one was written.
pub fn cmake_args(
    sources: &[&[String]],
    arch: &str,
    platform: &str,
    extra_conf_overlay: Option<&str>,
) -> Vec<String> {
    let mut args: Vec<String> = sources
        .iter()
        .flat_map(|source| filter_conditional(source, arch, platform))
        .collect();
    if let Some(overlay) = extra_conf_overlay {
        args.push(format!("OVERLAY_CONFIG=\"{overlay}\""));
    }
    to_cmake_defines(merge_overlay_configs(args))
}

/// Kconfig fragment content for `extra_configs`, filtered for the target.
pub fn extra_config_fragment(extra_configs: &[String], arch: &str, platform: &str) -> Option<String> {
    let configs = filter_conditional(extra_configs, arch, platform);
    if configs.is_empty() {
        return None;
    }
    let mut fragment = configs.join("\n");
    fragment.push('\n');
    Some(fragment)
}
