//! Benchmarks for Puppetfile evaluation.
//!
//! These benchmarks measure lexing, parsing and evaluating Puppetfiles of
//! various sizes, from a handful of Forge modules to large control
//! repositories with hundreds of git declarations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use envdeploy::puppetfile::Puppetfile;
use std::path::Path;

/// A few Forge modules.
const SMALL_PUPPETFILE: &str = r#"
forge 'https://forgeapi.puppet.com'

mod 'puppetlabs/stdlib', '9.4.1'
mod 'puppetlabs/concat', '>= 7.0.0 < 10.0.0'
mod 'puppetlabs/inifile', :latest
"#;

/// Every declaration form in use at once.
const MIXED_PUPPETFILE: &str = r#"
forge "https://forge.example.com/"
moduledir 'modules'

mod 'puppetlabs/stdlib', '8.6.0'
mod 'profile',
  :git    => 'https://git.example.com/puppet/profile.git',
  :branch => :control_branch,
  :default_branch => 'main'
mod 'ntp', git: 'https://git.example.com/puppet/ntp.git', tag: 'v2.0.0'
mod('firewall', :git => 'https://git.example.com/puppet/firewall.git', :commit => '4c3f1b7e')
mod 'vendored', :type => 'local_directory', :source => 'files/vendored'
mod 'bundle', type: 'tarball', source: 'https://dl.example.com/bundle.tar.gz',
  sha256sum: 'e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855'
mod 'site', :local => true
"#;

/// Generate a Puppetfile with `forge` Forge modules and `git` git modules.
fn generate_puppetfile(forge: usize, git: usize) -> String {
    let mut source = String::from("forge 'https://forgeapi.puppet.com'\n\n");
    for i in 0..forge {
        source.push_str(&format!("mod 'owner{}/forge{}', '1.{}.0'\n", i % 7, i, i % 10));
    }
    for i in 0..git {
        source.push_str(&format!(
            "mod 'git{i}',\n  :git => 'https://git.example.com/puppet/git{i}.git',\n  :ref => 'release/{i}'\n"
        ));
    }
    source
}

fn evaluate(source: &str) -> Puppetfile {
    Puppetfile::parse_str(
        source,
        Path::new("/etc/puppetlabs/code/environments/production/Puppetfile"),
        Path::new("/etc/puppetlabs/code/environments/production"),
    )
    .unwrap()
}

fn bench_puppetfile_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("puppetfile_parsing");

    group.bench_function("small", |b| b.iter(|| evaluate(black_box(SMALL_PUPPETFILE))));
    group.bench_function("mixed", |b| b.iter(|| evaluate(black_box(MIXED_PUPPETFILE))));

    group.finish();
}

fn bench_puppetfile_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("puppetfile_scaling");

    for modules in [10, 100, 500] {
        let source = generate_puppetfile(modules / 2, modules / 2);
        group.bench_with_input(BenchmarkId::new("modules", modules), &source, |b, source| {
            b.iter(|| evaluate(black_box(source)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_puppetfile_parsing, bench_puppetfile_scaling);
criterion_main!(benches);
