//! Integration tests for identity resolution with on-disk persistence and a
//! mocked remote mapping endpoint.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use streamsweep::identity::store::{REMOTE_CACHE_FILE, USER_MAPPINGS_FILE};
use streamsweep::identity::{
    HttpMappingSource, IdentityError, IdentityResolver, JsonFileStore, MappingStore, MappingTable,
    NoRemote, RemoteCache, ResolverSettings,
};
use streamsweep_common::TechMetadata;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CSV: &str = "\
standard_name,raw_names,logo_url,group_name,tvg_id,tvg_chno,tvg_shift,catchup,catchup_days,catchup_source
##########News##########,,,,,,,,,
News 24,\"N24,NEWS-24 HD\",https://logos/n24.png,News,n24,24,,,,
Sports One,\"SPORT1\",,Sports,,,,,,
";

fn meta(service: &str) -> TechMetadata {
    TechMetadata {
        service_name: Some(service.to_string()),
        resolution: Some("1280x720".to_string()),
        codec: Some("h264".to_string()),
        bitrate: None,
    }
}

async fn mock_csv(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/mappings.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CSV))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn http_source(server: &MockServer) -> Arc<HttpMappingSource> {
    Arc::new(HttpMappingSource::new(
        format!("{}/mappings.csv", server.uri()),
        Duration::from_secs(5),
    ))
}

async fn load(dir: &TempDir, server: &MockServer) -> IdentityResolver {
    IdentityResolver::load(
        Arc::new(JsonFileStore::new(dir.path())),
        http_source(server),
        ResolverSettings::default(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn remote_dataset_is_fetched_once_then_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_csv(&server, 1).await;

    let first = load(&dir, &server).await;
    assert!(dir.path().join(REMOTE_CACHE_FILE).exists());

    let identity = first.lookup("n24").unwrap();
    assert_eq!(identity.standard_name, "News 24");
    assert_eq!(identity.group.as_deref(), Some("News"));
    assert_eq!(identity.logo.as_deref(), Some("https://logos/n24.png"));
    assert_eq!(identity.extended.tvg_chno.as_deref(), Some("24"));

    // Fresh cache: no second request (checked by `expect(1)` on drop).
    let second = load(&dir, &server).await;
    assert_eq!(second.mapping_counts(), (2, 0));
    assert_eq!(second.lookup("SPORT1").unwrap().standard_name, "Sports One");
}

#[tokio::test]
async fn stale_cache_is_used_when_the_remote_fails() {
    let dir = TempDir::new().unwrap();
    let store = JsonFileStore::new(dir.path());

    let mut cached = MappingTable::new();
    cached.insert(
        "Old Channel".to_string(),
        streamsweep::identity::MappingEntry {
            raw_names: vec!["OLDCH".to_string()],
            ..Default::default()
        },
    );
    store
        .save_remote_cache(&RemoteCache {
            fetched_at: Some(chrono::Utc::now() - chrono::Duration::days(3)),
            mappings: cached,
        })
        .unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = load(&dir, &server).await;
    assert_eq!(resolver.lookup("oldch").unwrap().standard_name, "Old Channel");
}

#[tokio::test]
async fn unreachable_remote_without_cache_starts_empty() {
    let dir = TempDir::new().unwrap();
    let resolver = IdentityResolver::load(
        Arc::new(JsonFileStore::new(dir.path())),
        Arc::new(NoRemote),
        ResolverSettings::default(),
    )
    .await
    .unwrap();

    assert_eq!(resolver.mapping_counts(), (0, 0));
    let identity = resolver.resolve("Some Channel", "http://h/1", &meta("Some Channel"));
    assert_eq!(identity.standard_name, "Some Channel");
    assert_eq!(identity.group, None);
}

#[tokio::test]
async fn user_mappings_override_remote_and_persist() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_csv(&server, 1).await;

    let resolver = load(&dir, &server).await;
    resolver
        .add_user_mapping("N24", "My News", None, Some("Favourites"))
        .unwrap();
    assert!(dir.path().join(USER_MAPPINGS_FILE).exists());

    let identity = resolver.resolve("N24", "http://h/n24", &meta("N24"));
    assert_eq!(identity.standard_name, "My News");
    assert_eq!(identity.group.as_deref(), Some("Favourites"));

    // Reload from disk; the remote cache is still fresh.
    let reloaded = load(&dir, &server).await;
    assert_eq!(reloaded.lookup("n24").unwrap().standard_name, "My News");
    assert_eq!(reloaded.user_mappings().len(), 1);
    assert!(reloaded.fingerprint_count() >= 1);

    assert!(reloaded.remove_user_mapping("My News").unwrap());
    assert!(!reloaded.remove_user_mapping("My News").unwrap());
    assert_eq!(reloaded.lookup("n24").unwrap().standard_name, "News 24");
}

#[tokio::test]
async fn empty_user_mapping_is_rejected() {
    let dir = TempDir::new().unwrap();
    let resolver = IdentityResolver::load(
        Arc::new(JsonFileStore::new(dir.path())),
        Arc::new(NoRemote),
        ResolverSettings::default(),
    )
    .await
    .unwrap();

    let err = resolver.add_user_mapping("  ", "Std", None, None).unwrap_err();
    assert_matches!(err, IdentityError::InvalidMapping(_));
    assert!(!dir.path().join(USER_MAPPINGS_FILE).exists());
}

#[tokio::test]
async fn refresh_picks_up_new_remote_data() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_csv(&server, 2).await;

    let resolver = load(&dir, &server).await;
    let count = resolver.refresh_remote_mappings().await.unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn conflicting_resolutions_flag_the_fingerprint() {
    let dir = TempDir::new().unwrap();
    let resolver = IdentityResolver::load(
        Arc::new(JsonFileStore::new(dir.path())),
        Arc::new(NoRemote),
        ResolverSettings::default(),
    )
    .await
    .unwrap();
    resolver.add_user_mapping("Alpha", "Channel A", None, None).unwrap();
    resolver.add_user_mapping("Beta", "Channel B", None, None).unwrap();
    resolver.add_user_mapping("Gamma", "Channel C", None, None).unwrap();

    let address = "rtp://239.1.1.9:5000";
    let metadata = meta("shared");
    assert_eq!(resolver.resolve("Alpha", address, &metadata).standard_name, "Channel A");
    assert_eq!(resolver.resolve("Beta", address, &metadata).standard_name, "Channel B");
    assert!(resolver.unstable_mappings().is_empty());
    assert_eq!(resolver.resolve("Gamma", address, &metadata).standard_name, "Channel C");

    let unstable = resolver.unstable_mappings();
    assert_eq!(unstable.len(), 1);
    assert_eq!(unstable[0].address, address);
    assert_eq!(unstable[0].fingerprint, resolver.fingerprint(address, &metadata));
    assert_eq!(unstable[0].names, vec!["Channel A", "Channel B", "Channel C"]);
    assert_eq!(unstable[0].count, 3);

    // Further observations keep every name visible instead of picking one.
    resolver.resolve("Alpha", address, &metadata);
    assert_eq!(
        resolver.mapping_suggestions("alpha"),
        vec!["Channel A", "Channel B", "Channel C"]
    );

    // Flag survives a reload.
    let reloaded = IdentityResolver::load(
        Arc::new(JsonFileStore::new(dir.path())),
        Arc::new(NoRemote),
        ResolverSettings::default(),
    )
    .await
    .unwrap();
    assert_eq!(reloaded.unstable_mappings().len(), 1);
}

#[tokio::test]
async fn stable_fingerprint_carries_a_previous_name() {
    let dir = TempDir::new().unwrap();
    let resolver = IdentityResolver::load(
        Arc::new(JsonFileStore::new(dir.path())),
        Arc::new(NoRemote),
        ResolverSettings::default(),
    )
    .await
    .unwrap();
    resolver.add_user_mapping("CH5 HD", "Channel 5", None, Some("General")).unwrap();

    let address = "http://10.1.1.5/live";
    let metadata = meta("ch5");
    resolver.resolve("CH5 HD", address, &metadata);

    // Same stream, unknown raw name: history supplies the identity.
    let identity = resolver.resolve("stream_5", address, &metadata);
    assert_eq!(identity.standard_name, "Channel 5");
    assert_eq!(identity.group.as_deref(), Some("General"));
}
