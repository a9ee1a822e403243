//! Puppetfile evaluation tests using datatest-stable for fixture discovery
//!
//! Every `*.Puppetfile` under `tests/testdata/puppetfiles/valid` must
//! evaluate, and every one under `tests/testdata/puppetfiles/invalid` must be
//! rejected. The environment root is the fixture's directory.

use envdeploy::puppetfile::{Puppetfile, SourceKind};
use std::collections::HashSet;
use std::path::Path;

fn test_puppetfile(path: &Path) -> datatest_stable::Result<()> {
    let basedir = path
        .parent()
        .ok_or_else(|| format!("{} has no parent directory", path.display()))?;
    let basedir = std::path::absolute(basedir)?;
    let expect_valid = basedir.ends_with("valid");

    let result = Puppetfile::load(&basedir.join(path.file_name().unwrap_or_default()), &basedir);

    if !expect_valid {
        assert!(
            result.is_err(),
            "{} should be rejected but evaluated to {:?}",
            path.display(),
            result.map(|pf| pf.modules)
        );
        return Ok(());
    }

    let puppetfile =
        result.map_err(|e| format!("Failed to evaluate {}: {}", path.display(), e))?;

    let mut names = HashSet::new();
    for module in &puppetfile.modules {
        assert!(
            names.insert(module.name.clone()),
            "duplicate module {} in {}",
            module.name,
            path.display()
        );
        assert!(
            module.path.starts_with(&puppetfile.basedir),
            "module {} installs outside the environment: {}",
            module.name,
            module.path.display()
        );
        assert_eq!(module.path, module.install_dir.join(&module.name));
        assert!(
            module.install_dir == puppetfile.basedir
                || puppetfile.managed_directories.contains(&module.install_dir),
            "install directory of {} is not managed",
            module.name
        );
        assert!(puppetfile.desired_contents.contains(&module.path));
        if module.kind == SourceKind::Forge {
            assert!(
                module.owner.is_some(),
                "Forge module {} has no owner",
                module.name
            );
        }
    }
    assert!(puppetfile
        .managed_directories
        .contains(&puppetfile.moduledir));
    assert!(
        !puppetfile.managed_directories.contains(&puppetfile.basedir),
        "the environment root of {} is managed",
        path.display()
    );

    Ok(())
}

datatest_stable::harness!(
    test_puppetfile,
    "tests/testdata/puppetfiles",
    r".*\.Puppetfile$"
);
