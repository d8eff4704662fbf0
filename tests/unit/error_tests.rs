//! Unit tests for error formatting and conversions.

use forgelink::AppError;

#[test]
fn display_prefixes_identify_the_domain() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Launch("spawn".into()), "launch: spawn"),
        (AppError::Connect("refused".into()), "connect: refused"),
        (AppError::Transport("reset".into()), "transport: reset"),
        (AppError::Protocol("tag".into()), "protocol: tag"),
        (AppError::Rendezvous("dir".into()), "rendezvous: dir"),
        (AppError::Console("mode".into()), "console: mode"),
        (AppError::Resolve("missing".into()), "resolve: missing"),
        (AppError::Io("eof".into()), "io: eof"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn io_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(_)));
}

#[test]
fn toml_errors_convert_to_config() {
    let parse = toml::from_str::<toml::Value>("not = = toml").unwrap_err();
    let err: AppError = parse.into();
    assert!(matches!(err, AppError::Config(_)));
}
