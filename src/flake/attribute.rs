use crate::error::Error;

/// Contains ordered collection of an attribute path.
///
/// e.g. `nixosConfigurations.myhost.config.system.build.toplevel` is
/// `[nixosConfigurations, myhost, config, system, build, toplevel]` internally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlakeAttr {
    attr_path: Vec<String>,
}

impl FlakeAttr {
    /// `nixosConfigurations.<configuration>`
    pub fn configuration(configuration: &str) -> Result<Self, Error> {
        let mut attr = Self::try_from(configuration.to_string())?;
        attr.attr_path.insert(0, "nixosConfigurations".to_string());
        Ok(attr)
    }

    /// appends the attribute path `.config.system.build.toplevel`, i.e. the path used when running
    /// the standard build: `nixosConfigurations.<hostname>.config....`
    pub fn route_to_toplevel(&mut self) {
        self.attr_path
            .extend_from_slice(&["config", "system", "build", "toplevel"].map(String::from));
    }
}

/// "" -> Error
/// "contains"double.quote" -> Error
/// "contains#hash" -> Error
/// "foo" -> [foo]
/// "foo.bar" -> [foo, bar]
impl TryFrom<String> for FlakeAttr {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.contains('#') || value.contains('"') || value.is_empty() {
            log::trace!("malformed attr: {}", value);
            return Err(Error::InvalidAttribute(value));
        }
        Ok(FlakeAttr {
            attr_path: value.split('.').map(ToString::to_string).collect(),
        })
    }
}

/// `["flake", "attribute", "path"]` -> "flake.attribute.path"
impl std::fmt::Display for FlakeAttr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.attr_path.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert!(FlakeAttr::try_from(String::new()).is_err());
        assert!(FlakeAttr::try_from("a#b".to_string()).is_err());
        assert!(FlakeAttr::try_from("a\"b".to_string()).is_err());
        assert_eq!(
            FlakeAttr::try_from("foo.bar".to_string()).unwrap().to_string(),
            "foo.bar"
        );
    }

    #[test]
    fn toplevel_of_configuration() {
        let mut attr = FlakeAttr::configuration("myhost").unwrap();
        attr.route_to_toplevel();
        assert_eq!(
            attr.to_string(),
            "nixosConfigurations.myhost.config.system.build.toplevel"
        );
    }
}
