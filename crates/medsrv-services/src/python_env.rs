//! Python package inventory for the notebook runtime.
//!
//! Packages are listed with `pip list --format=json` and compared by their
//! normalized distribution name, so `Jupyter_Core` and `jupyter-core` count
//! as the same package.

use std::collections::HashSet;
use std::path::Path;

use medsrv_types::PythonPackage;

use crate::process::ProbeCommand;

/// Packages the notebook runtime needs
pub const REQUIRED_PYTHON_PACKAGES: &[&str] = &["notebook"];

pub fn pip_list_command(python: &Path) -> ProbeCommand {
    ProbeCommand::new(python).args(["-m", "pip", "list", "--format=json", "--disable-pip-version-check"])
}

pub fn pip_install_command<S: AsRef<str>>(python: &Path, packages: &[S]) -> ProbeCommand {
    ProbeCommand::new(python)
        .args(["-m", "pip", "install", "--disable-pip-version-check"])
        .args(packages.iter().map(|package| package.as_ref().to_string()))
}

/// Parse `pip list --format=json`; pip may print warnings before the array
pub fn parse_pip_list(output: &str) -> Result<Vec<PythonPackage>, serde_json::Error> {
    let json = output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('['))
        .unwrap_or(output.trim());
    serde_json::from_str(json)
}

/// Distribution name with case, `_` and `.` folded the way pip compares them
pub fn normalize_package_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_dash = !normalized.is_empty();
            continue;
        }
        if pending_dash {
            normalized.push('-');
            pending_dash = false;
        }
        normalized.push(c.to_ascii_lowercase());
    }
    normalized
}

/// Entries of `required` absent from `installed`, in `required` order
pub fn missing_packages(installed: &[PythonPackage], required: &[&str]) -> Vec<String> {
    let present: HashSet<String> = installed
        .iter()
        .map(|package| normalize_package_name(&package.name))
        .collect();

    required
        .iter()
        .filter(|name| !present.contains(&normalize_package_name(name)))
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn package(name: &str, version: &str) -> PythonPackage {
        PythonPackage {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    #[test]
    fn pip_list_skips_leading_warnings() {
        let output = "WARNING: Ignoring invalid distribution -ip\n\
                      [{\"name\": \"notebook\", \"version\": \"7.2.1\"}, {\"name\": \"pymongo\", \"version\": \"4.8.0\"}]\n";
        let packages = parse_pip_list(output).unwrap();
        assert_eq!(
            packages,
            vec![package("notebook", "7.2.1"), package("pymongo", "4.8.0")]
        );

        assert!(parse_pip_list("pip: command not found").is_err());
        assert_eq!(parse_pip_list("[]").unwrap(), Vec::new());
    }

    #[rstest]
    #[case("Jupyter_Core", "jupyter-core")]
    #[case("zope.interface", "zope-interface")]
    #[case("ruamel__yaml", "ruamel-yaml")]
    #[case(" notebook ", "notebook")]
    fn names_are_normalized(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_package_name(raw), expected);
    }

    #[test]
    fn missing_packages_compare_normalized_names() {
        let installed = vec![package("Notebook", "7.2.1"), package("jupyter_core", "5.7.2")];
        assert!(missing_packages(&installed, &["notebook", "jupyter-core"]).is_empty());
        assert_eq!(
            missing_packages(&installed, &["pymongo", "notebook", "pandas"]),
            vec!["pymongo".to_string(), "pandas".to_string()]
        );
    }

    #[test]
    fn install_command_lists_packages() {
        let command = pip_install_command(Path::new("/opt/py/bin/python3"), &["notebook", "pymongo"]);
        assert_eq!(
            command.to_string(),
            "/opt/py/bin/python3 -m pip install --disable-pip-version-check notebook pymongo"
        );
    }
}
