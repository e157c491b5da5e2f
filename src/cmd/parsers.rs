use crate::flake::FlakeAttr;

/// Profile names end up as keys of the settings file and in log lines, nothing more, but an
/// empty one or one with a path separator is surely a mistake.
pub(super) fn profile_name_parse(name: &str) -> Result<String, String> {
    if name.is_empty() || name.contains('/') {
        return Err(format!("not a profile name: {name:?}"));
    }
    Ok(name.to_string())
}

pub(super) fn configuration_parse(val: &str) -> Result<String, String> {
    FlakeAttr::try_from(val.to_string())
        .map(|_| val.to_string())
        .map_err(|e| e.to_string())
}
