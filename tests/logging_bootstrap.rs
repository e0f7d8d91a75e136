use soulbrowser_observe::{init_logging, LogConfig};

#[test]
fn logging_installs_once_and_rejects_bad_filters() {
    std::env::remove_var("RUST_LOG");

    let bad = LogConfig {
        level: "perceiver=loudest".into(),
        json: false,
    };
    assert!(init_logging(&bad).is_err());

    let config = LogConfig {
        level: "debug".into(),
        json: true,
    };
    init_logging(&config).expect("first init");
    assert!(init_logging(&config).is_err());
}
