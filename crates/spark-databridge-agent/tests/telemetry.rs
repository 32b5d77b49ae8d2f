//! 全局 Subscriber 只能安装一次；重复安装不得覆盖已有配置。

use spark_databridge_agent::{TelemetryError, init_tracing};

#[test]
fn second_install_is_rejected() {
    init_tracing("spark_databridge_agent=debug").expect("first install");
    tracing::info!(target: "spark_databridge_agent", "subscriber installed");

    let err = init_tracing("info").expect_err("already installed");
    assert!(matches!(err, TelemetryError::SubscriberAlreadySet));
}
