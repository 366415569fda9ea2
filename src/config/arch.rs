//! CPU architecture types and utilities.

use std::fmt;

/// CPU architecture of the release target.
///
/// Detected from the Rust target triple and translated into the selector the
/// packaging tool expects.
///
/// # Examples
///
/// ```
/// use kodegen_release_pipeline::config::Arch;
///
/// let arch = Arch::from_target("aarch64-apple-darwin");
/// assert_eq!(arch, Arch::AArch64);
/// assert_eq!(arch.packaging_name(), "arm64");
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// x86_64 / AMD64 (64-bit)
    X86_64,
    /// x86 / i686 (32-bit)
    X86,
    /// AArch64 / ARM64 (64-bit) - Apple Silicon, modern ARM devices
    AArch64,
    /// ARM with hard-float (32-bit)
    Armhf,
    /// ARM with soft-float (32-bit)
    Armel,
    /// RISC-V (64-bit)
    Riscv64,
    /// macOS universal binary - Contains both x86_64 and AArch64
    Universal,
}

impl Arch {
    /// Detects the architecture from a Rust target triple.
    ///
    /// `universal-apple-darwin` maps to [`Arch::Universal`]; unknown prefixes
    /// fall back to x86_64.
    pub fn from_target(target: &str) -> Self {
        if target.starts_with("universal") {
            Arch::Universal
        } else if target.starts_with("x86_64") {
            Arch::X86_64
        } else if target.starts_with('i') {
            Arch::X86
        } else if target.starts_with("aarch64") {
            Arch::AArch64
        } else if target.starts_with("arm") && target.ends_with("hf") {
            Arch::Armhf
        } else if target.starts_with("arm") {
            Arch::Armel
        } else if target.starts_with("riscv64") {
            Arch::Riscv64
        } else {
            Arch::X86_64 // fallback
        }
    }

    /// Architecture name understood by desktop packaging tools.
    pub fn packaging_name(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x64",
            Arch::X86 => "ia32",
            Arch::AArch64 => "arm64",
            Arch::Armhf => "armv7l",
            Arch::Armel => "armv7l",
            Arch::Riscv64 => "riscv64",
            Arch::Universal => "universal",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.packaging_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_release_targets() {
        assert_eq!(Arch::from_target("x86_64-pc-windows-gnu"), Arch::X86_64);
        assert_eq!(Arch::from_target("aarch64-apple-darwin"), Arch::AArch64);
        assert_eq!(Arch::from_target("i686-pc-windows-msvc"), Arch::X86);
        assert_eq!(Arch::from_target("armv7-unknown-linux-gnueabihf"), Arch::Armhf);
        assert_eq!(Arch::from_target("universal-apple-darwin"), Arch::Universal);
    }

    #[test]
    fn packaging_names_follow_electron_conventions() {
        assert_eq!(Arch::X86_64.packaging_name(), "x64");
        assert_eq!(Arch::AArch64.to_string(), "arm64");
    }
}
