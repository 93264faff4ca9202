//! Supported language tags

use crate::StepError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    C,
    Cpp,
    Java,
}

impl Language {
    pub const ALL: [Self; 4] = [Self::Python, Self::C, Self::Cpp, Self::Java];

    /// Wire tag, as accepted by `from_str`
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Java => "java",
        }
    }

    /// Source file suffix, without the dot
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Java => "java",
        }
    }

    #[must_use]
    pub const fn is_compiled(self) -> bool {
        !matches!(self, Self::Python)
    }

    /// Guess the language from a file extension
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "py" => Some(Self::Python),
            "c" => Some(Self::C),
            "cpp" | "cc" | "cxx" => Some(Self::Cpp),
            "java" => Some(Self::Java),
            _ => None,
        }
    }
}

impl FromStr for Language {
    type Err = StepError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "python" => Ok(Self::Python),
            "c" => Ok(Self::C),
            "cpp" => Ok(Self::Cpp),
            "java" => Ok(Self::Java),
            other => Err(StepError::UnsupportedLanguage(other.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for language in Language::ALL {
            assert_eq!(language.tag().parse::<Language>().unwrap(), language);
        }
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        let err = "rust".parse::<Language>().unwrap_err();
        assert!(matches!(err, StepError::UnsupportedLanguage(tag) if tag == "rust"));
    }

    #[test]
    fn extension_lookup() {
        assert_eq!(Language::from_path(Path::new("a/b.cc")), Some(Language::Cpp));
        assert_eq!(Language::from_path(Path::new("Main.java")), Some(Language::Java));
        assert_eq!(Language::from_path(Path::new("notes.txt")), None);
        assert_eq!(Language::from_path(Path::new("Makefile")), None);
    }
}
