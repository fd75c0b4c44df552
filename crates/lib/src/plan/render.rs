//! Requirement and installer command rendering.

use crate::consts::ROOT_ENV;
use crate::manifest::PackageSpec;
use crate::placeholder::{Placeholder, PlaceholderError, Resolver};

/// Version operators that are passed through verbatim. Longest first.
const OPERATORS: &[&str] = &["===", "==", ">=", "<=", "~=", "!=", "<", ">"];

/// Render a package as an installer requirement specifier.
///
/// `*` or an empty constraint yields the bare name, an operator-prefixed
/// constraint is appended as-is, and anything else is an exact pin.
pub fn render_requirement(spec: &PackageSpec) -> String {
  let version = spec.version.trim();

  if version.is_empty() || version == "*" {
    spec.name.clone()
  } else if OPERATORS.iter().any(|op| version.starts_with(op)) {
    format!("{}{}", spec.name, version)
  } else {
    format!("{}=={}", spec.name, version)
  }
}

/// Quote a word for `/bin/sh` if it contains anything beyond a safe set.
pub fn shell_quote(word: &str) -> String {
  let safe = !word.is_empty()
    && word
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || "._-=+~!,:@/".contains(c));

  if safe {
    word.to_string()
  } else {
    format!("'{}'", word.replace('\'', r"'\''"))
  }
}

/// Placeholder values for one install step.
pub(crate) struct StepResolver {
  requirements: String,
  names: String,
  names_csv: String,
  reinstall: String,
  root: String,
}

impl StepResolver {
  pub(crate) fn new(packages: &[PackageSpec], reinstall_flags: Option<&str>) -> Self {
    let names: Vec<String> = packages.iter().map(|p| shell_quote(&p.name)).collect();

    Self {
      requirements: packages
        .iter()
        .map(|p| shell_quote(&render_requirement(p)))
        .collect::<Vec<_>>()
        .join(" "),
      names: names.join(" "),
      names_csv: names.join(","),
      reinstall: reinstall_flags.unwrap_or_default().to_string(),
      // Resolved by the shell at run time so the rendered command, and with it
      // the step hash, does not depend on where the working root lives.
      root: format!("${ROOT_ENV}"),
    }
  }
}

impl Resolver for StepResolver {
  fn resolve(&self, placeholder: &Placeholder) -> Result<&str, PlaceholderError> {
    Ok(match placeholder {
      Placeholder::Requirements => &self.requirements,
      Placeholder::Names => &self.names,
      Placeholder::NamesCsv => &self.names_csv,
      Placeholder::Reinstall => &self.reinstall,
      Placeholder::Root => &self.root,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::placeholder::substitute;
  use crate::util::testutil::pkg;

  #[test]
  fn wildcard_renders_bare_name() {
    assert_eq!(render_requirement(&pkg("flask", "*")), "flask");
    assert_eq!(render_requirement(&pkg("flask", "")), "flask");
  }

  #[test]
  fn operators_pass_through() {
    assert_eq!(render_requirement(&pkg("numpy", ">=1.26,<2")), "numpy>=1.26,<2");
    assert_eq!(render_requirement(&pkg("numpy", "~=1.26")), "numpy~=1.26");
    assert_eq!(render_requirement(&pkg("numpy", "===1.26.4")), "numpy===1.26.4");
  }

  #[test]
  fn bare_version_is_exact_pin() {
    assert_eq!(render_requirement(&pkg("spacy", "3.7.2")), "spacy==3.7.2");
  }

  #[test]
  fn quoting() {
    assert_eq!(shell_quote("numpy==1.26.4"), "numpy==1.26.4");
    assert_eq!(shell_quote("numpy>=1.26"), "'numpy>=1.26'");
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
    assert_eq!(shell_quote(""), "''");
  }

  #[test]
  fn resolver_fills_step_values() {
    let packages = vec![pkg("numpy", "1.26.4"), pkg("scipy", "<2")];
    let resolver = StepResolver::new(&packages, Some("--force-reinstall"));
    let out = substitute(
      "install $${reinstall} $${requirements} [$${names}] [$${names_csv}] $${root}",
      &resolver,
    )
    .unwrap();

    assert_eq!(
      out,
      "install --force-reinstall numpy==1.26.4 'scipy<2' [numpy scipy] [numpy,scipy] $ABIFORGE_ROOT"
    );
  }
}
