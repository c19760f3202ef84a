//! Tests for choosing between competing helpers.

#![cfg(unix)]

mod common;

use common::FakeTools;
use diskwright_core::{helper_select, Candidate, Error, Platform};
use semver::Version;

fn stream_optimized_candidates() -> Vec<Candidate> {
    vec![
        Candidate::at_least("qemu-img", Version::new(2, 5, 1)),
        Candidate::any("vmdktool"),
        Candidate::at_least("qemu-img", Version::new(2, 1, 0)),
    ]
}

#[test]
fn test_first_satisfying_installed_candidate_wins() {
    let tools = FakeTools::new();
    tools.add_qemu_img("2.12.0");
    tools.add_vmdktool();
    let toolbox = tools.toolbox(Platform::Linux);

    let selection = helper_select(&toolbox, &stream_optimized_candidates()).unwrap();
    assert_eq!(selection.name(), "qemu-img");
    assert_eq!(selection.index, 0);
    assert_eq!(selection.min_version, Some(Version::new(2, 5, 1)));
}

#[test]
fn test_installed_fallback_clause_beats_installing() {
    let tools = FakeTools::new();
    tools.add_qemu_img("2.1.0");
    tools.add_brew();
    let toolbox = tools.toolbox(Platform::MacOs);

    let selection = helper_select(&toolbox, &stream_optimized_candidates()).unwrap();
    assert_eq!(selection.name(), "qemu-img");
    assert_eq!(selection.index, 2);
    assert_eq!(selection.min_version, Some(Version::new(2, 1, 0)));
    assert!(tools.calls_starting_with("brew").is_empty());
}

#[test]
fn test_installs_next_candidate_when_installed_one_is_too_old() {
    let tools = FakeTools::new();
    tools.add_qemu_img("2.1.0");
    tools.add_brew();
    let toolbox = tools.toolbox(Platform::MacOs);

    let candidates = [
        Candidate::at_least("qemu-img", Version::new(2, 5, 1)),
        Candidate::any("vmdktool"),
    ];
    let selection = helper_select(&toolbox, &candidates).unwrap();
    assert_eq!(selection.name(), "vmdktool");
    assert_eq!(selection.index, 1);
    assert!(selection.helper.is_installed());
    assert_eq!(tools.calls_starting_with("brew install"), vec!["brew install vmdktool"]);
}

#[test]
fn test_unreadable_version_never_satisfies_minimum() {
    let tools = FakeTools::new();
    tools.add("qemu-img", "echo \"no version here\"\n");
    tools.add_vmdktool();
    let toolbox = tools.toolbox(Platform::Linux);

    let selection = helper_select(&toolbox, &stream_optimized_candidates()).unwrap();
    assert_eq!(selection.name(), "vmdktool");
    assert_eq!(selection.index, 1);
}

#[test]
fn test_candidate_without_minimum_accepts_any_version() {
    let tools = FakeTools::new();
    tools.add_qemu_img("0.12.1");
    let toolbox = tools.toolbox(Platform::Linux);

    let selection = helper_select(&toolbox, &["qemu-img".into()]).unwrap();
    assert_eq!(selection.index, 0);
    assert_eq!(selection.min_version, None);
}

#[test]
fn test_nothing_usable_reports_every_candidate() {
    let tools = FakeTools::new();
    tools.add_qemu_img("1.0.0");
    let toolbox = tools.toolbox(Platform::Linux);

    let err = helper_select(&toolbox, &stream_optimized_candidates()).unwrap_err();
    assert!(matches!(err, Error::NoUsableHelper { .. }), "got {err}");
    assert!(err.is_retryable());

    let message = err.to_string();
    assert!(message.contains("'qemu-img' version 1.0.0 is installed"), "{message}");
    assert!(message.contains("qemu-img >= 2.5.1"), "{message}");
    assert!(message.contains("qemu-img >= 2.1.0"), "{message}");
    assert!(message.contains("vmdktool"), "{message}");
}

#[test]
fn test_candidate_display() {
    assert_eq!(Candidate::any("vmdktool").to_string(), "vmdktool");
    assert_eq!(
        Candidate::from(("qemu-img", Version::new(2, 1, 0))).to_string(),
        "qemu-img >= 2.1.0"
    );
}
