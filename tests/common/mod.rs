#![allow(dead_code)]
//! Shared fixture plumbing for the integration tests.
//!
//! Builds a complete installation prefix in a temp directory: the shipped
//! schemas, a modules tree, interface/type/error definitions and a
//! deployment config, then hands out settings and compilers over it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use chargevisor::{CompileError, CompiledConfig, Compiler, Overrides, Settings};

pub struct Fixture {
    dir: TempDir,
    config_override: Option<PathBuf>,
}

impl Fixture {
    /// Creates a prefix skeleton with the shipped schemas installed.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp prefix");
        let data = dir.path().join("share").join("chargevisor");
        for sub in ["schemas", "modules", "interfaces", "types", "errors", "www"] {
            fs::create_dir_all(data.join(sub)).unwrap();
        }
        fs::create_dir_all(dir.path().join("etc").join("chargevisor")).unwrap();

        let shipped = Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas");
        for name in [
            "config",
            "manifest",
            "interface",
            "type",
            "error_declaration_list",
        ] {
            fs::copy(
                shipped.join(format!("{name}.yaml")),
                data.join("schemas").join(format!("{name}.yaml")),
            )
            .unwrap();
        }

        Self {
            dir,
            config_override: None,
        }
    }

    pub fn prefix(&self) -> &Path {
        self.dir.path()
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.path().join("share").join("chargevisor")
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.dir.path().join("etc").join("chargevisor")
    }

    /// Writes the deployment config (YAML).
    pub fn deployment(&self, content: &str) -> &Self {
        fs::write(self.configs_dir().join("config.yaml"), content).unwrap();
        self
    }

    /// Writes a legacy JSON deployment next to the default one and points
    /// the fixture at it.
    pub fn deployment_json(&mut self, content: &str) -> &Self {
        let path = self.configs_dir().join("config.json");
        fs::write(&path, content).unwrap();
        self.config_override = Some(path);
        self
    }

    /// Points the fixture at an arbitrary deployment document.
    pub fn use_config(&mut self, path: PathBuf) -> &Self {
        self.config_override = Some(path);
        self
    }

    pub fn add_module(&self, module_type: &str, manifest: &str) -> &Self {
        let module_dir = self.data_dir().join("modules").join(module_type);
        fs::create_dir_all(&module_dir).unwrap();
        fs::write(module_dir.join("manifest.yaml"), manifest).unwrap();
        self
    }

    pub fn add_interface(&self, name: &str, content: &str) -> &Self {
        fs::write(
            self.data_dir().join("interfaces").join(format!("{name}.yaml")),
            content,
        )
        .unwrap();
        self
    }

    pub fn add_type(&self, name: &str, content: &str) -> &Self {
        fs::write(
            self.data_dir().join("types").join(format!("{name}.yaml")),
            content,
        )
        .unwrap();
        self
    }

    pub fn add_errors(&self, name: &str, content: &str) -> &Self {
        fs::write(
            self.data_dir().join("errors").join(format!("{name}.yaml")),
            content,
        )
        .unwrap();
        self
    }

    pub fn settings(&self) -> Arc<Settings> {
        Arc::new(
            Settings::new(Overrides {
                prefix: Some(self.dir.path().to_path_buf()),
                config: self.config_override.clone(),
                validate_schema: None,
            })
            .expect("fixture settings"),
        )
    }

    pub fn compile(&self) -> Result<CompiledConfig, CompileError> {
        Compiler::new(self.settings()).expect("schemas load").compile()
    }
}

/// A module type with one implementation of `test_interface` and a module
/// config entry carrying a default.
pub fn valid_manifest() -> &'static str {
    r#"description: Test module with a valid manifest
metadata:
  license: https://opensource.org/licenses/Apache-2.0
  authors:
    - Chargevisor Tests
provides:
  main:
    interface: test_interface
    description: Main implementation
    config:
      valid_impl_entry:
        type: string
        default: hello
config:
  valid_config_entry:
    type: string
    default: hi there
"#
}

/// A module type whose interface carries one command, one variable and a
/// type reference.
pub fn cmd_var_manifest() -> &'static str {
    r#"description: Test module with command and variable
metadata:
  license: https://opensource.org/licenses/Apache-2.0
  authors:
    - Chargevisor Tests
provides:
  main:
    interface: test_interface_cmd_var
    description: Main implementation
"#
}

pub fn test_interface() -> &'static str {
    r#"description: Minimal test interface
vars:
  ping:
    type: string
"#
}

pub fn test_interface_cmd_var() -> &'static str {
    r#"description: Interface with one command and one variable
cmds:
  test_command:
    description: Echo command
    arguments:
      test_argument:
        type: string
    result:
      type: boolean
vars:
  test_variable:
    "$ref": /test_type#/TestType
"#
}

pub fn test_type() -> &'static str {
    r#"description: Test type definitions
TestType:
  type: string
"#
}

/// Installs the standard valid module (`TESTValidManifest`) and its
/// interface.
pub fn with_valid_module(fixture: &Fixture) {
    fixture
        .add_module("TESTValidManifest", valid_manifest())
        .add_interface("test_interface", test_interface());
}

/// Installs the cmd/var module (`TESTValidManifestCmdVar`), its interface
/// and the type it references.
pub fn with_cmd_var_module(fixture: &Fixture) {
    fixture
        .add_module("TESTValidManifestCmdVar", cmd_var_manifest())
        .add_interface("test_interface_cmd_var", test_interface_cmd_var())
        .add_type("test_type", test_type());
}
