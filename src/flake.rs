use std::fmt::Display;

use crate::error::Error;

mod attribute;
pub use attribute::FlakeAttr;

/// `<flake>#<attribute>`, e.g. `/etc/nixos#nixosConfigurations.myhost.config.system.build.toplevel`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlakeRef {
    /// Pre-`#` component. A path or any flake url nix understands
    pub source: String,
    /// Post-`#` component
    pub output_selector: FlakeAttr,
}

impl Display for FlakeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.source, self.output_selector)
    }
}

impl FlakeRef {
    /// The system closure of a configuration:
    /// `<flake>#nixosConfigurations.<configuration>.config.system.build.toplevel`
    pub fn toplevel(flake: &str, configuration: &str) -> Result<Self, Error> {
        let mut attr = FlakeAttr::configuration(configuration)?;
        attr.route_to_toplevel();
        Ok(Self {
            source: flake.to_string(),
            output_selector: attr,
        })
    }

    /// `<flake>#nixosConfigurations.<configuration>`, what `nix repl` gets loaded with
    pub fn configuration(flake: &str, configuration: &str) -> Result<Self, Error> {
        Ok(Self {
            source: flake.to_string(),
            output_selector: FlakeAttr::configuration(configuration)?,
        })
    }
}

/// Splits `--flake` input: `path#name` gives the configuration name as well, plain `path` does
/// not.
pub fn split_flake_arg(value: &str) -> (String, Option<String>) {
    // no '#'? we just have the source, no selected attr
    let Some((path, name)) = value.split_once('#') else {
        return (value.to_string(), None);
    };
    let name = Some(name.to_string()).filter(|n| !n.is_empty());
    (path.to_string(), name)
}
