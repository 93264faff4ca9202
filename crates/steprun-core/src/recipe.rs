//! Language recipes
//!
//! The pipeline stays language-agnostic; each recipe supplies the suffix,
//! the compile and run argument vectors and any rewrite of the materialized
//! source that its toolchain needs.

use crate::toolchain::{CompileCommand, Tool, Toolchains};
use crate::workspace::Workspace;
use crate::{Language, Result, StepError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use std::path::Path;

/// Facts about the source a recipe needs later on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    /// Java entry class, from the first `public class <Name>`
    pub class_name: Option<String>,
}

/// Recipe contract for language-specific compile/run stages.
pub trait Recipe: Send + Sync {
    fn language(&self) -> Language;

    /// Checks on the raw text. Runs before any file is written.
    fn inspect(&self, _source: &str) -> Result<SourceInfo> {
        Ok(SourceInfo::default())
    }

    /// Rewrite the workspace before compiling.
    fn prepare(&self, _workspace: &mut Workspace, _info: &SourceInfo) -> Result<()> {
        Ok(())
    }

    /// `None` for interpreted languages.
    fn compile_command(
        &self,
        tools: &Toolchains,
        workspace: &mut Workspace,
        info: &SourceInfo,
    ) -> Result<Option<CompileCommand>>;

    fn run_command(
        &self,
        tools: &Toolchains,
        workspace: &Workspace,
        info: &SourceInfo,
        artifact: Option<&Path>,
    ) -> Result<Vec<OsString>>;
}

static PYTHON: PythonRecipe = PythonRecipe;
static C: NativeRecipe = NativeRecipe {
    language: Language::C,
    compiler: Tool::Cc,
};
static CPP: NativeRecipe = NativeRecipe {
    language: Language::Cpp,
    compiler: Tool::Cxx,
};
static JAVA: JavaRecipe = JavaRecipe;

/// The recipe for `language`
#[must_use]
pub fn recipe_for(language: Language) -> &'static dyn Recipe {
    match language {
        Language::Python => &PYTHON,
        Language::C => &C,
        Language::Cpp => &CPP,
        Language::Java => &JAVA,
    }
}

/// Interpreter invoked on the source file; no compile step.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonRecipe;

impl Recipe for PythonRecipe {
    fn language(&self) -> Language {
        Language::Python
    }

    fn compile_command(
        &self,
        _tools: &Toolchains,
        _workspace: &mut Workspace,
        _info: &SourceInfo,
    ) -> Result<Option<CompileCommand>> {
        Ok(None)
    }

    fn run_command(
        &self,
        tools: &Toolchains,
        workspace: &Workspace,
        _info: &SourceInfo,
        _artifact: Option<&Path>,
    ) -> Result<Vec<OsString>> {
        Ok(vec![
            tools.program(Tool::Python)?.into(),
            workspace.source().into(),
        ])
    }
}

/// C and C++: system compiler to a workspace-unique executable, then run it.
#[derive(Debug, Clone, Copy)]
pub struct NativeRecipe {
    language: Language,
    compiler: Tool,
}

impl Recipe for NativeRecipe {
    fn language(&self) -> Language {
        self.language
    }

    fn compile_command(
        &self,
        tools: &Toolchains,
        workspace: &mut Workspace,
        _info: &SourceInfo,
    ) -> Result<Option<CompileCommand>> {
        let compiler = tools.program(self.compiler)?.as_os_str().to_owned();
        let artifact = workspace.artifact_path();
        Ok(Some(CompileCommand {
            argv: vec![
                compiler,
                workspace.source().into(),
                "-o".into(),
                artifact.clone().into_os_string(),
            ],
            artifact,
        }))
    }

    fn run_command(
        &self,
        _tools: &Toolchains,
        _workspace: &Workspace,
        _info: &SourceInfo,
        artifact: Option<&Path>,
    ) -> Result<Vec<OsString>> {
        let artifact = artifact.ok_or_else(|| {
            StepError::Workspace(format!("no compiled artifact for {}", self.language))
        })?;
        Ok(vec![artifact.into()])
    }
}

/// javac on `<Class>.java`, then the JVM with the workspace as classpath.
#[derive(Debug, Clone, Copy, Default)]
pub struct JavaRecipe;

static PUBLIC_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"public\s+class\s+(\w+)").expect("public class pattern is valid")
});

/// First declared public class name, if any
#[must_use]
pub fn public_class_name(source: &str) -> Option<&str> {
    PUBLIC_CLASS
        .captures(source)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

impl JavaRecipe {
    fn class_name(info: &SourceInfo) -> Result<&str> {
        info.class_name.as_deref().ok_or(StepError::NoPublicClass)
    }
}

impl Recipe for JavaRecipe {
    fn language(&self) -> Language {
        Language::Java
    }

    fn inspect(&self, source: &str) -> Result<SourceInfo> {
        let class_name = public_class_name(source).ok_or(StepError::NoPublicClass)?;
        Ok(SourceInfo {
            class_name: Some(class_name.to_string()),
        })
    }

    fn prepare(&self, workspace: &mut Workspace, info: &SourceInfo) -> Result<()> {
        let class_name = Self::class_name(info)?;
        workspace.rename_source(&format!("{class_name}.java"))?;
        Ok(())
    }

    fn compile_command(
        &self,
        tools: &Toolchains,
        workspace: &mut Workspace,
        info: &SourceInfo,
    ) -> Result<Option<CompileCommand>> {
        let class_name = Self::class_name(info)?;
        let javac = tools.program(Tool::Javac)?.as_os_str().to_owned();
        let artifact = workspace.dir().join(format!("{class_name}.class"));
        workspace.track(artifact.clone());
        Ok(Some(CompileCommand {
            argv: vec![
                javac,
                "-d".into(),
                workspace.dir().into(),
                workspace.source().into(),
            ],
            artifact,
        }))
    }

    fn run_command(
        &self,
        tools: &Toolchains,
        workspace: &Workspace,
        info: &SourceInfo,
        _artifact: Option<&Path>,
    ) -> Result<Vec<OsString>> {
        Ok(vec![
            tools.program(Tool::Java)?.into(),
            "-cp".into(),
            workspace.dir().into(),
            Self::class_name(info)?.into(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolchainConfig;
    use std::os::unix::fs::PermissionsExt;

    fn fake_tools(dir: &Path) -> Toolchains {
        let mut config = ToolchainConfig::default();
        for name in ["python", "gcc", "g++", "javac", "java"] {
            let path = dir.join(name);
            std::fs::write(&path, "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        config.python = dir.join("python").display().to_string();
        config.cc = dir.join("gcc").display().to_string();
        config.cxx = dir.join("g++").display().to_string();
        config.javac = dir.join("javac").display().to_string();
        config.java = dir.join("java").display().to_string();
        Toolchains::resolve(&config)
    }

    #[test]
    fn dispatch_covers_every_language() {
        for language in Language::ALL {
            assert_eq!(recipe_for(language).language(), language);
        }
    }

    #[test]
    fn finds_first_public_class() {
        let source = "import java.util.*;\nclass Helper {}\npublic   class Main {\n}\npublic class Other {}";
        assert_eq!(public_class_name(source), Some("Main"));
        assert_eq!(public_class_name("class Main {}"), None);
    }

    #[test]
    fn java_without_public_class_fails_inspection() {
        let err = recipe_for(Language::Java)
            .inspect("class Main { public static void main(String[] a) {} }")
            .unwrap_err();
        assert!(matches!(err, StepError::NoPublicClass));
    }

    #[test]
    fn native_compile_writes_to_a_workspace_artifact() {
        let bin = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let tools = fake_tools(bin.path());
        let mut workspace = Workspace::acquire(root.path(), Language::C, "int main(){}").unwrap();
        let recipe = recipe_for(Language::C);

        let command = recipe
            .compile_command(&tools, &mut workspace, &SourceInfo::default())
            .unwrap()
            .unwrap();
        assert!(command.artifact.starts_with(workspace.dir()));
        assert!(
            command
                .artifact
                .to_string_lossy()
                .contains(workspace.id())
        );
        assert_eq!(command.argv[0], bin.path().join("gcc").into_os_string());
        assert_eq!(command.argv[1], workspace.source().as_os_str());
        assert_eq!(command.argv[2], "-o");

        let run = recipe
            .run_command(&tools, &workspace, &SourceInfo::default(), Some(&command.artifact))
            .unwrap();
        assert_eq!(run, vec![command.artifact.clone().into_os_string()]);
    }

    #[test]
    fn java_renames_and_runs_by_class_name() {
        let bin = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let tools = fake_tools(bin.path());
        let source = "public class Greeter { }";
        let recipe = recipe_for(Language::Java);

        let info = recipe.inspect(source).unwrap();
        let mut workspace = Workspace::acquire(root.path(), Language::Java, source).unwrap();
        recipe.prepare(&mut workspace, &info).unwrap();
        assert_eq!(workspace.source(), workspace.dir().join("Greeter.java"));

        let command = recipe
            .compile_command(&tools, &mut workspace, &info)
            .unwrap()
            .unwrap();
        assert_eq!(command.artifact, workspace.dir().join("Greeter.class"));

        let run = recipe.run_command(&tools, &workspace, &info, None).unwrap();
        assert_eq!(run[1], "-cp");
        assert_eq!(run[2], workspace.dir().as_os_str());
        assert_eq!(run[3], "Greeter");
    }

    #[test]
    fn python_has_no_compile_step() {
        let bin = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let tools = fake_tools(bin.path());
        let mut workspace = Workspace::acquire(root.path(), Language::Python, "print(1)").unwrap();
        let recipe = recipe_for(Language::Python);

        assert!(
            recipe
                .compile_command(&tools, &mut workspace, &SourceInfo::default())
                .unwrap()
                .is_none()
        );
        let run = recipe
            .run_command(&tools, &workspace, &SourceInfo::default(), None)
            .unwrap();
        assert_eq!(run[1], workspace.source().as_os_str());
    }
}
