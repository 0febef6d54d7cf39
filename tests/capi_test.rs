use std::sync::Arc;

use auproc::units::{Gain, SineSource};
use auproc::{
    API_VERSION, ApiVersion, BindingErrorKind, CapabilityTable, Client, ClientConfig, ClientError,
    ConnectorKind, ConnectorType, Direction, Directions, LEGACY_API_VERSION, ProcessorHost,
};

fn host(name: &str) -> (Client, Arc<dyn ProcessorHost>) {
    let client = Client::open(name, ClientConfig::default()).expect("open client");
    let host: Arc<dyn ProcessorHost> = Arc::new(client.clone());
    (client, host)
}

#[test]
fn client_table_offers_current_and_legacy_revisions() {
    let (client, _) = host("capi");
    let table = client.capabilities();
    assert_eq!(table.versions(), [API_VERSION, LEGACY_API_VERSION]);
    assert_eq!(API_VERSION.to_string(), "1.2.0");
    assert_eq!(LEGACY_API_VERSION.to_string(), "0.1.0");

    assert_eq!(table.select(1, 0).map(|r| r.version), Some(API_VERSION));
    assert_eq!(table.select(1, 2).map(|r| r.version), Some(API_VERSION));
    assert_eq!(table.select(0, 0).map(|r| r.version), Some(LEGACY_API_VERSION));
    assert_eq!(table.select(0, 1).map(|r| r.version), Some(LEGACY_API_VERSION));
    assert!(table.select(0, 2).is_none());
    assert!(table.select(1, 3).is_none());
    assert!(table.select(2, 0).is_none());
}

#[test]
fn legacy_revision_only_knows_ports() {
    let (client, _) = host("legacy");
    let table = client.capabilities();
    let legacy = &table.select(0, 1).expect("legacy revision").host;

    let out = client
        .register_port("out", ConnectorType::Audio, Direction::Out)
        .unwrap();
    let buffer = client.create_process_buffer(ConnectorType::Audio).unwrap();
    assert_eq!(legacy.classify(out.into()), ConnectorKind::Port);
    assert_eq!(legacy.possible_directions(out.into()), Directions::OUT);
    assert_eq!(legacy.classify(buffer.into()), ConnectorKind::None);
    assert_eq!(legacy.connector_type(buffer.into()), None);
    assert_eq!(legacy.possible_directions(buffer.into()), Directions::NONE);

    let sine = || Box::new(SineSource::new(48_000, 440.0, 0.5));
    match legacy.register(SineSource::descriptor("sine"), &[buffer.into()], sine()) {
        Err(ClientError::Binding { index, kind }) => {
            assert_eq!((index, kind), (0, BindingErrorKind::ConnectorInvalid));
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(client.processors().is_empty());

    let id = legacy
        .register(SineSource::descriptor("sine"), &[out.into()], sine())
        .unwrap();
    legacy.activate(id).unwrap();
    assert!(client.processors()[0].activated);
    legacy.deactivate(id).unwrap();
    legacy.unregister(id).unwrap();
    assert!(client.processors().is_empty());
}

#[test]
fn select_prefers_the_newest_compatible_revision() {
    let (_client, host) = host("revisions");
    let table = CapabilityTable::new(ApiVersion::new(1, 1, 5), host.clone())
        .with_revision(ApiVersion::new(1, 2, 0), host.clone())
        .with_revision(ApiVersion::new(1, 2, 3), host.clone())
        .with_revision(ApiVersion::new(2, 0, 0), host);

    let pick = |major, minor| table.select(major, minor).map(|r| r.version);
    assert_eq!(pick(1, 0), Some(ApiVersion::new(1, 2, 3)));
    assert_eq!(pick(1, 2), Some(ApiVersion::new(1, 2, 3)));
    assert_eq!(pick(2, 0), Some(ApiVersion::new(2, 0, 0)));
    assert_eq!(pick(2, 1), None);
    assert!(CapabilityTable::default().select(1, 0).is_none());
}

#[test]
fn units_register_through_the_host_interface() {
    let (client, _) = host("via-host");
    let table = client.capabilities();
    let revision = table.select(1, 2).expect("revision");
    let host = &revision.host;

    let input = client
        .register_port("in", ConnectorType::Audio, Direction::In)
        .unwrap();
    let output = client.create_process_buffer(ConnectorType::Audio).unwrap();
    assert_eq!(host.classify(output.into()), ConnectorKind::ProcessBuffer);
    assert_eq!(host.connector_type(output.into()), Some(ConnectorType::Audio));
    assert_eq!(host.possible_directions(output.into()), Directions::OUT);

    let id = host
        .register(
            Gain::descriptor("gain"),
            &[input.into(), output.into()],
            Box::new(Gain::new(1.0)),
        )
        .unwrap();
    assert_eq!(host.possible_directions(output.into()), Directions::IN);
    assert_eq!(client.processors()[0].id, id);
    assert_eq!(host.process_begin_frame_time(), 0);
    host.log_info("registered through the host interface");

    host.deactivate(id).unwrap();
    host.unregister(id).unwrap();
    assert!(client.processors().is_empty());

    assert!(!host.is_closed());
    client.close();
    assert!(host.is_closed());
}
