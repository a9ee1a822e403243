//! End-to-end tests for `envdeploy puppetfile`.
//!
//! Only local and local-directory modules are used, so nothing here needs
//! the network or a git binary.

#[allow(dead_code)]
mod common;
use common::prelude::*;

const LOCAL_PUPPETFILE: &str = r#"
mod 'site', :local => true
mod 'vendored', :type => 'local_directory', :source => 'files/vendored'
"#;

#[test]
fn test_check_lists_modules() {
    let fixture = TestFixture::new()
        .with_config(configs::EMPTY)
        .with_file(
            "Puppetfile",
            "mod 'puppetlabs/stdlib', '9.4.1'\nmod 'site', :local => true\n",
        );

    fixture
        .command()
        .args(["puppetfile", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stdlib"))
        .stdout(predicate::str::contains("9.4.1"))
        .stdout(predicate::str::contains("modules/site"))
        .stdout(predicate::str::contains("[OK] Syntax OK"));
}

#[test]
fn test_check_reports_line_of_syntax_error() {
    let fixture = TestFixture::new()
        .with_config(configs::EMPTY)
        .with_file("Puppetfile", "mod 'site', :local => true\nbogus 'x'\n");

    fixture
        .command()
        .args(["puppetfile", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bogus"))
        .stderr(predicate::str::contains("2"));
}

#[test]
fn test_check_missing_puppetfile() {
    let fixture = TestFixture::new().with_config(configs::EMPTY);

    fixture
        .command()
        .args(["puppetfile", "check", "--puppetfile", "nowhere/Puppetfile"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to evaluate"));
}

#[test]
fn test_install_copies_and_purges() {
    let fixture = TestFixture::new()
        .with_config(configs::PUPPETFILE_PURGE_ONLY)
        .with_file("Puppetfile", LOCAL_PUPPETFILE)
        .with_file("files/vendored/manifests/init.pp", "class vendored {}\n")
        .with_file("modules/site/manifests/init.pp", "class site {}\n")
        .with_file("modules/stale/manifests/init.pp", "class stale {}\n");

    fixture
        .command()
        .args(["puppetfile", "install"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 modules declared"));

    fixture
        .child("modules/vendored/manifests/init.pp")
        .assert(predicate::path::exists());
    fixture
        .child("modules/site/manifests/init.pp")
        .assert(predicate::path::exists());
    fixture
        .child("modules/stale")
        .assert(predicate::path::missing());
}

#[test]
fn test_install_with_moduledir_override() {
    let fixture = TestFixture::new()
        .with_config(configs::EMPTY)
        .with_file("Puppetfile", LOCAL_PUPPETFILE)
        .with_file("files/vendored/manifests/init.pp", "class vendored {}\n");

    fixture
        .command()
        .args(["puppetfile", "install", "--moduledir", "vendor"])
        .assert()
        .success();

    fixture
        .child("vendor/vendored/manifests/init.pp")
        .assert(predicate::path::exists());
    fixture.child("modules/vendored").assert(predicate::path::missing());
}

#[test]
fn test_purge_removes_undeclared_modules() {
    let fixture = TestFixture::new()
        .with_config(configs::EMPTY)
        .with_file("Puppetfile", "mod 'site', :local => true\n")
        .with_file("modules/site/init.pp", "")
        .with_file("modules/old/init.pp", "");

    fixture
        .command()
        .args(["puppetfile", "purge"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed"));

    fixture.child("modules/site").assert(predicate::path::exists());
    fixture.child("modules/old").assert(predicate::path::missing());
}
