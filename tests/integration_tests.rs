use std::sync::Arc;
use std::time::Duration;

use relpoll::cli::{execute, CliOptions};
use relpoll::{
    DeliveryError, Error, FetchError, FileStore, GitHubReleaseSource, GitHubSourceConfig,
    NotificationSink, Notification, NotifiedState, PollerConfig, ReleasePoller, ReleaseSource,
    Runner, StateStore, TelegramConfig, TelegramSink, TrackedRepository,
};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOT_TOKEN: &str = "test-token";

fn release_json(repo: &str, id: u64, tag: &str, published_at: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "tag_name": tag,
        "name": format!("Release {}", tag),
        "body": "Notes",
        "prerelease": false,
        "draft": false,
        "html_url": format!("https://github.com/{}/releases/tag/{}", repo, tag),
        "published_at": published_at
    })
}

fn mock_releases_json() -> serde_json::Value {
    serde_json::json!([
        {
            "id": 4,
            "tag_name": "v3.0.0-draft",
            "name": "Draft Release",
            "body": "Draft release - should be filtered",
            "prerelease": false,
            "draft": true,
            "html_url": "https://github.com/test/repo/releases/tag/v3.0.0-draft",
            "published_at": "2024-04-01T10:00:00Z"
        },
        {
            "id": 3,
            "tag_name": "v2.1.0-beta.1",
            "name": "Version 2.1.0 Beta 1",
            "body": "Latest prerelease",
            "prerelease": true,
            "draft": false,
            "html_url": "https://github.com/test/repo/releases/tag/v2.1.0-beta.1",
            "published_at": "2024-03-20T10:00:00Z"
        },
        {
            "id": 1,
            "tag_name": "v1.0.0",
            "name": "Version 1.0.0",
            "body": "First stable release",
            "prerelease": false,
            "draft": false,
            "html_url": "https://github.com/test/repo/releases/tag/v1.0.0",
            "published_at": "2024-01-01T10:00:00Z"
        },
        {
            "id": 2,
            "tag_name": "v2.0.0",
            "name": "Version 2.0.0",
            "body": "Latest stable release",
            "prerelease": false,
            "draft": false,
            "html_url": "https://github.com/test/repo/releases/tag/v2.0.0",
            "published_at": "2024-03-15T10:00:00Z"
        }
    ])
}

fn repo(name: &str) -> TrackedRepository {
    TrackedRepository::parse(name).unwrap()
}

fn github_source(server: &MockServer, config: GitHubSourceConfig) -> GitHubReleaseSource {
    GitHubReleaseSource::new(config.base_url(server.uri())).unwrap()
}

fn telegram_sink(server: &MockServer) -> TelegramSink {
    TelegramSink::new(TelegramConfig::new(BOT_TOKEN, "@releases").api_base_url(server.uri()))
        .unwrap()
}

fn telegram_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "ok": true,
        "result": { "message_id": 1 }
    }))
}

fn sample_notification() -> Notification {
    Notification {
        repository: repo("owner/repoX"),
        release_tag: "v1.1".to_string(),
        link: "https://github.com/owner/repoX/releases/tag/v1.1".to_string(),
        name: None,
        body: None,
        published_at: None,
        prerelease: false,
    }
}

fn file_store(dir: &TempDir) -> FileStore {
    FileStore::new(
        dir.path().join("data/notified.json"),
        dir.path().join("badge/tracked-count.json"),
    )
}

fn runner(github: &MockServer, telegram: &MockServer, store: FileStore) -> Runner {
    let source = github_source(github, GitHubSourceConfig::new());
    let poller = ReleasePoller::new(Arc::new(source), PollerConfig::default());
    Runner::new(poller, Arc::new(telegram_sink(telegram)), Arc::new(store))
}

#[tokio::test]
async fn test_source_filters_drafts_and_orders_newest_first() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .and(query_param("per_page", "30"))
        .and(header("Accept", "application/vnd.github+json"))
        .and(header("X-GitHub-Api-Version", "2022-11-28"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_releases_json()))
        .mount(&mock_server)
        .await;

    let source = github_source(&mock_server, GitHubSourceConfig::new());
    let releases = source.fetch_releases(&repo("test/repo")).await.unwrap();

    let tags: Vec<&str> = releases.iter().map(|r| r.tag_name.as_str()).collect();
    assert_eq!(tags, ["v2.1.0-beta.1", "v2.0.0", "v1.0.0"]);
    assert!(releases.iter().all(|r| r.repository == repo("test/repo")));
    assert_eq!(releases[1].id, 2);
}

#[tokio::test]
async fn test_source_can_skip_prereleases_and_limit_window() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_releases_json()))
        .mount(&mock_server)
        .await;

    let config = GitHubSourceConfig::new()
        .include_prereleases(false)
        .releases_per_repo(1);
    let source = github_source(&mock_server, config);
    let releases = source.fetch_releases(&repo("test/repo")).await.unwrap();

    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].tag_name, "v2.0.0");
}

#[tokio::test]
async fn test_source_sends_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .and(header("Authorization", "Bearer test-token-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = github_source(&mock_server, GitHubSourceConfig::new().token("test-token-123"));
    let releases = source.fetch_releases(&repo("test/repo")).await.unwrap();

    assert!(releases.is_empty());
}

#[tokio::test]
async fn test_source_api_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&mock_server)
        .await;

    let source = github_source(&mock_server, GitHubSourceConfig::new());
    let result = source.fetch_releases(&repo("test/repo")).await;

    let Err(FetchError::Api { status, message }) = result else {
        panic!("Expected Api error");
    };
    assert_eq!(status, 404);
    assert_eq!(message, "Not Found");
}

#[tokio::test]
async fn test_source_malformed_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let source = github_source(&mock_server, GitHubSourceConfig::new());
    let result = source.fetch_releases(&repo("test/repo")).await;

    assert!(matches!(result, Err(FetchError::Json(_))));
}

#[tokio::test]
async fn test_source_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/test/repo/releases"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let config = GitHubSourceConfig::new().timeout(Duration::from_millis(200));
    let source = github_source(&mock_server, config);
    let result = source.fetch_releases(&repo("test/repo")).await;

    assert!(matches!(result, Err(FetchError::Timeout(d)) if d == Duration::from_millis(200)));
}

#[tokio::test]
async fn test_telegram_delivery_payload() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", BOT_TOKEN)))
        .and(body_partial_json(serde_json::json!({
            "chat_id": "@releases",
            "parse_mode": "HTML",
            "reply_markup": {
                "inline_keyboard": [[{
                    "text": "⬇️ View release",
                    "url": "https://github.com/owner/repoX/releases/tag/v1.1"
                }]]
            }
        })))
        .respond_with(telegram_ok())
        .expect(1)
        .mount(&mock_server)
        .await;

    telegram_sink(&mock_server)
        .deliver(&sample_notification())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_telegram_api_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", BOT_TOKEN)))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: chat not found"
        })))
        .mount(&mock_server)
        .await;

    let result = telegram_sink(&mock_server)
        .deliver(&sample_notification())
        .await;

    let Err(DeliveryError::Api { status, description }) = result else {
        panic!("Expected Api error");
    };
    assert_eq!(status, 400);
    assert_eq!(description, "Bad Request: chat not found");
}

#[tokio::test]
async fn test_telegram_retries_short_rate_limit_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", BOT_TOKEN)))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 0",
            "parameters": { "retry_after": 0 }
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", BOT_TOKEN)))
        .respond_with(telegram_ok())
        .expect(1)
        .mount(&mock_server)
        .await;

    telegram_sink(&mock_server)
        .deliver(&sample_notification())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_telegram_long_rate_limit_is_not_waited_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", BOT_TOKEN)))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 120",
            "parameters": { "retry_after": 120 }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = telegram_sink(&mock_server)
        .deliver(&sample_notification())
        .await;

    assert!(matches!(
        result,
        Err(DeliveryError::RateLimited { retry_after: 120 })
    ));
}

#[tokio::test]
async fn test_run_announces_new_release_once_and_writes_files() {
    let github = MockServer::start().await;
    let telegram = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/owner/repoX/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            release_json("owner/repoX", 11, "v1.1", "2024-02-01T00:00:00Z"),
            release_json("owner/repoX", 10, "v1.0", "2024-01-01T00:00:00Z"),
        ])))
        .mount(&github)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", BOT_TOKEN)))
        .and(body_partial_json(serde_json::json!({
            "reply_markup": { "inline_keyboard": [[{
                "url": "https://github.com/owner/repoX/releases/tag/v1.1"
            }]] }
        })))
        .respond_with(telegram_ok())
        .expect(1)
        .mount(&telegram)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let prior: NotifiedState = [("owner/repoX", vec!["v1.0"])].into_iter().collect();
    store.save_notified(&prior).unwrap();

    let tracked = vec![repo("owner/repoX")];

    let summary = runner(&github, &telegram, store.clone())
        .run(&tracked)
        .await
        .unwrap();
    assert_eq!(summary.notifications, 1);
    assert_eq!(summary.delivered, 1);
    assert!(summary.persisted);

    let expected: NotifiedState = [("owner/repoX", vec!["v1.0", "v1.1"])]
        .into_iter()
        .collect();
    assert_eq!(store.load_notified().unwrap(), expected);

    let badge: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.badge_path()).unwrap()).unwrap();
    assert_eq!(badge, serde_json::json!({ "tracked_count": 1 }));

    // Nothing new upstream: no message and a byte-identical state file.
    let before = std::fs::read(store.notified_path()).unwrap();
    let again = runner(&github, &telegram, store.clone())
        .run(&tracked)
        .await
        .unwrap();
    assert_eq!(again.notifications, 0);
    assert_eq!(std::fs::read(store.notified_path()).unwrap(), before);
}

#[tokio::test]
async fn test_run_isolates_failing_repository() {
    let github = MockServer::start().await;
    let telegram = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/owner/broken/releases"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&github)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/owner/fine/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            release_json("owner/fine", 1, "v0.2", "2024-05-01T00:00:00Z"),
        ])))
        .mount(&github)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", BOT_TOKEN)))
        .respond_with(telegram_ok())
        .expect(1)
        .mount(&telegram)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let prior: NotifiedState = [("owner/broken", vec!["v9"])].into_iter().collect();
    store.save_notified(&prior).unwrap();

    let tracked = vec![repo("owner/broken"), repo("owner/fine")];
    let summary = runner(&github, &telegram, store.clone())
        .run(&tracked)
        .await
        .unwrap();

    assert_eq!(summary.fetch_failures, 1);
    assert_eq!(summary.delivered, 1);

    let state = store.load_notified().unwrap();
    assert_eq!(state.tags(&tracked[0]), prior.tags(&tracked[0]));
    assert!(state.contains(&tracked[1], "v0.2"));

    let badge: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.badge_path()).unwrap()).unwrap();
    assert_eq!(badge["tracked_count"], 2);
}

#[tokio::test]
async fn test_run_records_release_when_delivery_fails() {
    let github = MockServer::start().await;
    let telegram = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/owner/repoX/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            release_json("owner/repoX", 1, "v1.0", "2024-01-01T00:00:00Z"),
        ])))
        .mount(&github)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", BOT_TOKEN)))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "ok": false,
            "error_code": 403,
            "description": "Forbidden: bot is not a member of the channel chat"
        })))
        .expect(1)
        .mount(&telegram)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let tracked = vec![repo("owner/repoX")];

    let summary = runner(&github, &telegram, store.clone())
        .run(&tracked)
        .await
        .unwrap();
    assert_eq!(summary.delivery_failures, 1);

    // The failed release is not retried on the next run.
    let again = runner(&github, &telegram, store.clone())
        .run(&tracked)
        .await
        .unwrap();
    assert_eq!(again.notifications, 0);
    assert!(store.load_notified().unwrap().contains(&tracked[0], "v1.0"));
}

#[tokio::test]
async fn test_run_treats_malformed_state_as_empty() {
    let github = MockServer::start().await;
    let telegram = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/owner/repoX/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            release_json("owner/repoX", 2, "v1.1", "2024-02-01T00:00:00Z"),
            release_json("owner/repoX", 1, "v1.0", "2024-01-01T00:00:00Z"),
        ])))
        .mount(&github)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", BOT_TOKEN)))
        .respond_with(telegram_ok())
        .expect(2)
        .mount(&telegram)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    std::fs::write(store.notified_path(), "owner/repoX: v1.0").unwrap();

    let summary = runner(&github, &telegram, store.clone())
        .run(&[repo("owner/repoX")])
        .await
        .unwrap();

    assert_eq!(summary.notifications, 2);
    let state = store.load_notified().unwrap();
    assert_eq!(state.tags(&repo("owner/repoX")).map(|t| t.len()), Some(2));
}

fn cli_options(dir: &TempDir) -> CliOptions {
    CliOptions {
        tracked_file: dir.path().join("data/tracked.json"),
        notified_file: dir.path().join("data/notified.json"),
        badge_file: dir.path().join("badge/tracked-count.json"),
        ..CliOptions::default()
    }
}

fn write_tracked(dir: &TempDir, repos: &[&str]) {
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    std::fs::write(
        dir.path().join("data/tracked.json"),
        serde_json::json!({ "repos": repos }).to_string(),
    )
    .unwrap();
}

#[tokio::test]
async fn test_cli_missing_tracked_file_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();

    let result = execute(CliOptions {
        bot_token: Some(BOT_TOKEN.to_string()),
        channel: Some("@releases".to_string()),
        ..cli_options(&dir)
    })
    .await
    .unwrap();

    assert!(result.is_none());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_cli_requires_telegram_credentials_outside_dry_run() {
    let dir = tempfile::tempdir().unwrap();
    write_tracked(&dir, &["owner/repoX"]);

    let result = execute(cli_options(&dir)).await;
    assert!(matches!(
        result,
        Err(Error::MissingCredential("TELEGRAM_BOT_TOKEN"))
    ));

    let result = execute(CliOptions {
        bot_token: Some(BOT_TOKEN.to_string()),
        ..cli_options(&dir)
    })
    .await;
    assert!(matches!(
        result,
        Err(Error::MissingCredential("TELEGRAM_CHANNEL"))
    ));

    assert!(!dir.path().join("data/notified.json").exists());
    assert!(!dir.path().join("badge").exists());
}

#[tokio::test]
async fn test_cli_merges_extra_repos_without_duplicates() {
    let github = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/a/one/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            release_json("a/one", 1, "v1", "2024-01-01T00:00:00Z"),
        ])))
        .expect(1)
        .mount(&github)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/b/two/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&github)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_tracked(&dir, &["a/one"]);

    let summary = execute(CliOptions {
        repos: vec![repo("a/one"), repo("b/two")],
        dry_run: true,
        github_api_url: Some(github.uri()),
        ..cli_options(&dir)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.tracked, 2);
    assert_eq!(summary.notifications, 1);
    assert!(summary.dry_run);
    assert!(!summary.persisted);
    assert!(!dir.path().join("data/notified.json").exists());
}

#[tokio::test]
async fn test_cli_extra_repos_without_tracked_file_run_live() {
    let github = MockServer::start().await;
    let telegram = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/owner/repoX/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            release_json("owner/repoX", 12, "v1.2", "2024-03-01T00:00:00Z"),
            release_json("owner/repoX", 11, "v1.1", "2024-02-01T00:00:00Z"),
        ])))
        .mount(&github)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", BOT_TOKEN)))
        .and(body_partial_json(serde_json::json!({ "chat_id": "@releases" })))
        .respond_with(telegram_ok())
        .expect(1)
        .mount(&telegram)
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    // Single-id file left by the previous poller.
    std::fs::write(dir.path().join("data/notified.json"), r#"{"owner/repoX": "11"}"#).unwrap();

    let summary = execute(CliOptions {
        repos: vec![repo("owner/repoX")],
        bot_token: Some(BOT_TOKEN.to_string()),
        channel: Some("@releases".to_string()),
        github_api_url: Some(github.uri()),
        telegram_api_url: Some(telegram.uri()),
        ..cli_options(&dir)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.notifications, 1);
    assert_eq!(summary.delivered, 1);
    assert!(summary.persisted);

    let on_disk: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("data/notified.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(on_disk, serde_json::json!({ "owner/repoX": ["v1.1", "v1.2"] }));
}
