use eyre::{eyre, Result};
use std::{fmt::Display, str::FromStr};

/// Whether a method is looked up on instances or on the class object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// `-[Class selector]`
    Instance,
    /// `+[Class selector]`
    Class,
}

/// An Objective-C method, named the way the symbol tables name it:
/// `-[IKImageContentView updateCornerRadius]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjcMethod {
    kind: MethodKind,
    class: String,
    selector: String,
}

impl Display for ObjcMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sigil = match self.kind {
            MethodKind::Instance => '-',
            MethodKind::Class => '+',
        };
        write!(f, "{sigil}[{} {}]", self.class, self.selector)
    }
}

impl FromStr for ObjcMethod {
    type Err = eyre::Report;

    fn from_str(name: &str) -> Result<Self> {
        let kind = match name.chars().next() {
            Some('-') => MethodKind::Instance,
            Some('+') => MethodKind::Class,
            _ => return Err(eyre!("{name:?} is not an Objective-C method symbol")),
        };
        let inner = name[1..]
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| eyre!("{name:?} is missing its brackets"))?;
        let (class, selector) = inner
            .split_once(' ')
            .ok_or_else(|| eyre!("{name:?} has no selector"))?;
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        };
        if !valid(class) || class.contains(':') || !valid(selector) {
            return Err(eyre!("{name:?} has an invalid class or selector name"));
        }
        Ok(Self {
            kind,
            class: class.to_owned(),
            selector: selector.to_owned(),
        })
    }
}

impl ObjcMethod {
    /// The class the method belongs to.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// The method's selector.
    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Whether this is an instance or class method.
    #[must_use]
    pub const fn kind(&self) -> MethodKind {
        self.kind
    }

    /// A C expression which, evaluated inside the target, yields the address
    /// of the method's implementation (or 0 if the runtime doesn't know it).
    ///
    /// None of these runtime functions have debug info in the target, so each
    /// call is cast to its declared return type.
    #[must_use]
    pub fn lookup_expression(&self) -> String {
        let getter = match self.kind {
            MethodKind::Instance => "class_getInstanceMethod",
            MethodKind::Class => "class_getClassMethod",
        };
        format!(
            "(unsigned long long)method_getImplementation((void *){getter}(\
             (void *)objc_getClass(\"{}\"), (void *)sel_registerName(\"{}\")))",
            self.class, self.selector
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_instance_method() {
        let method: ObjcMethod = "-[IKImageContentView updateCornerRadius]".parse().unwrap();
        assert_eq!(method.kind(), MethodKind::Instance);
        assert_eq!(method.class(), "IKImageContentView");
        assert_eq!(method.selector(), "updateCornerRadius");
        assert_eq!(method.to_string(), "-[IKImageContentView updateCornerRadius]");
    }

    #[test]
    fn parses_class_method_with_arguments() {
        let method: ObjcMethod = "+[NSObject instancesRespondToSelector:]".parse().unwrap();
        assert_eq!(method.kind(), MethodKind::Class);
        assert_eq!(method.selector(), "instancesRespondToSelector:");
    }

    #[test]
    fn rejects_malformed_names() {
        for name in [
            "",
            "updateCornerRadius",
            "-IKImageContentView updateCornerRadius",
            "-[IKImageContentView]",
            "-[IKImageContentView updateCornerRadius",
            "-[ updateCornerRadius]",
            "-[IKImageContentView update\"CornerRadius]",
            "-[Bad:Class selector]",
        ] {
            assert!(name.parse::<ObjcMethod>().is_err(), "{name:?} parsed");
        }
    }

    #[test]
    fn lookup_expression_goes_through_the_runtime() {
        let method: ObjcMethod = "-[QLDisplayBundleViewController enableBorder]"
            .parse()
            .unwrap();
        assert_eq!(
            method.lookup_expression(),
            "(unsigned long long)method_getImplementation((void *)class_getInstanceMethod(\
             (void *)objc_getClass(\"QLDisplayBundleViewController\"), \
             (void *)sel_registerName(\"enableBorder\")))"
        );
        let method: ObjcMethod = "+[NSBundle mainBundle]".parse().unwrap();
        assert!(method.lookup_expression().contains("class_getClassMethod("));
    }
}
