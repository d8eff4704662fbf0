//! Unit tests for rendezvous identity derivation.

use std::path::PathBuf;

use forgelink::handshake::{Handshake, HandshakeOptions, PROTOCOL_VERSION};

fn options() -> HandshakeOptions {
    HandshakeOptions {
        protocol_version: PROTOCOL_VERSION,
        tool_version: "0.3.0".to_owned(),
        architecture: "x86_64".to_owned(),
        worker_exe: PathBuf::from("/opt/forge/bin/forgelinkd"),
        low_priority: false,
    }
}

/// Two independent computations over identical options agree on every
/// derived name.
#[test]
fn identical_options_derive_identical_names() {
    let first = Handshake::compute(&options());
    let second = Handshake::compute(&options());

    assert_eq!(first.channel_name(), second.channel_name());
    assert_eq!(first.running_marker_name(), second.running_marker_name());
    assert_eq!(first.busy_marker_name(), second.busy_marker_name());
    assert_eq!(first.launch_marker_name(), second.launch_marker_name());
}

/// Any changed option yields a different channel name.
#[test]
fn differing_options_derive_differing_names() {
    let base = Handshake::compute(&options());

    let mut bumped = options();
    bumped.protocol_version += 1;
    assert_ne!(base.channel_name(), Handshake::compute(&bumped).channel_name());

    let mut other_exe = options();
    other_exe.worker_exe = PathBuf::from("/usr/local/bin/forgelinkd");
    assert_ne!(
        base.channel_name(),
        Handshake::compute(&other_exe).channel_name()
    );

    let mut low = options();
    low.low_priority = true;
    assert_ne!(base.channel_name(), Handshake::compute(&low).channel_name());
}

/// The four derived names for one identity never collide with each other.
#[test]
fn derived_names_are_distinct_per_purpose() {
    let handshake = Handshake::compute(&options());
    let names = [
        handshake.channel_name(),
        handshake.running_marker_name(),
        handshake.busy_marker_name(),
        handshake.launch_marker_name(),
    ];
    for (i, a) in names.iter().enumerate() {
        for b in names.iter().skip(i + 1) {
            assert_ne!(a, b);
        }
    }
}

/// The convenience constructor picks up the current process identity.
#[test]
fn for_worker_exe_fills_ambient_fields() {
    let opts = HandshakeOptions::for_worker_exe(PathBuf::from("/tmp/forgelinkd"), true);
    assert_eq!(opts.protocol_version, PROTOCOL_VERSION);
    assert_eq!(opts.architecture, std::env::consts::ARCH);
    assert!(opts.low_priority);
    assert!(!opts.tool_version.is_empty());
}
