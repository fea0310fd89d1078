use crate::{insn::Instruction, symbol::ObjcMethod};
use eyre::{eyre, Context, Result};
use std::collections::HashMap;

/// Resolved load addresses of methods within one attached process.
pub type Addresses = HashMap<ObjcMethod, u64>;

/// A single instruction overwrite, applied at the entry of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    /// Make the method return immediately.
    Return(ObjcMethod),
    /// Make the method jump straight into another one.
    Redirect {
        /// The method to neutralise.
        from: ObjcMethod,
        /// The method to run instead.
        to: ObjcMethod,
    },
}

/// A patch that has been assembled against resolved addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Write {
    /// Where the instruction goes.
    pub address: u64,
    /// What gets written there.
    pub instruction: Instruction,
}

impl Patch {
    /// The two patches that take the rounded corners and border off QuickLook
    /// image previews.
    pub fn quicklook() -> Result<Vec<Self>> {
        Ok(vec![
            Self::Return(
                "-[IKImageContentView updateCornerRadius]"
                    .parse()
                    .wrap_err("bad corner radius method name")?,
            ),
            Self::Redirect {
                from: "-[QLDisplayBundleViewController enableBorder]"
                    .parse()
                    .wrap_err("bad border method name")?,
                to: "-[QLDisplayBundleViewController disableBorder]"
                    .parse()
                    .wrap_err("bad border method name")?,
            },
        ])
    }

    /// The methods whose addresses this patch needs.
    #[must_use]
    pub fn methods(&self) -> Vec<&ObjcMethod> {
        match self {
            Self::Return(method) => vec![method],
            Self::Redirect { from, to } => vec![from, to],
        }
    }

    /// Work out what to write, and where.
    pub fn assemble(&self, addresses: &Addresses) -> Result<Write> {
        let address_of = |method: &ObjcMethod| {
            addresses
                .get(method)
                .copied()
                .ok_or_else(|| eyre!("no address was resolved for {method}"))
        };
        let write = match self {
            Self::Return(method) => Write {
                address: address_of(method)?,
                instruction: Instruction::RET,
            },
            Self::Redirect { from, to } => {
                let (from_address, to_address) = (address_of(from)?, address_of(to)?);
                Write {
                    address: from_address,
                    instruction: Instruction::branch(from_address, to_address)
                        .wrap_err(format!("couldn't encode a branch from {from} to {to}"))?,
                }
            }
        };
        log::debug!(
            "Assembled {self}: write {} at {:#x}",
            write.instruction,
            write.address
        );
        Ok(write)
    }
}

impl std::fmt::Display for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Return(method) => write!(f, "return from {method}"),
            Self::Redirect { from, to } => write!(f, "redirect {from} to {to}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(name: &str) -> ObjcMethod {
        name.parse().unwrap()
    }

    #[test]
    fn quicklook_patches_need_three_methods() {
        let patches = Patch::quicklook().unwrap();
        let names: Vec<String> = patches
            .iter()
            .flat_map(Patch::methods)
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            names,
            [
                "-[IKImageContentView updateCornerRadius]",
                "-[QLDisplayBundleViewController enableBorder]",
                "-[QLDisplayBundleViewController disableBorder]",
            ]
        );
    }

    #[test]
    fn return_patch_ignores_the_address() {
        let target = method("-[IKImageContentView updateCornerRadius]");
        let patch = Patch::Return(target.clone());
        for address in [0x1_8000_0000, 0x1_8000_0004, 0x2_0000_1230] {
            let addresses = Addresses::from([(target.clone(), address)]);
            let write = patch.assemble(&addresses).unwrap();
            assert_eq!(write.address, address);
            assert_eq!(write.instruction, Instruction::RET);
        }
    }

    #[test]
    fn redirect_branches_to_the_replacement() {
        let from = method("-[QLDisplayBundleViewController enableBorder]");
        let to = method("-[QLDisplayBundleViewController disableBorder]");
        let addresses = Addresses::from([(from.clone(), 0x1_9a00_2000), (to.clone(), 0x1_9a00_1f40)]);
        let write = Patch::Redirect { from, to }.assemble(&addresses).unwrap();
        assert_eq!(write.address, 0x1_9a00_2000);
        assert_eq!(write.instruction.branch_target(write.address), Some(0x1_9a00_1f40));
    }

    #[test]
    fn missing_address_is_an_error() {
        let from = method("-[QLDisplayBundleViewController enableBorder]");
        let to = method("-[QLDisplayBundleViewController disableBorder]");
        let addresses = Addresses::from([(from.clone(), 0x1000)]);
        assert!(Patch::Redirect { from, to }.assemble(&addresses).is_err());
    }
}
