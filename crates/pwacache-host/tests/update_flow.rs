mod common;

use common::{config, wait_until, Site};
use pwacache_common::{ActivationPolicy, CoordinatorConfig, PromptPolicy};
use pwacache_coordinator::{CoordinatorHandle, PromptState, UpdateCoordinator};
use pwacache_host::Page;
use std::sync::Arc;
use std::time::Duration;

async fn start_page(site: &Site, coordinator: CoordinatorConfig) -> (Arc<Page>, CoordinatorHandle) {
    let (page, events) = site.container.open_page("/").await.unwrap();
    let handle = UpdateCoordinator::start(site.container.clone(), page.clone(), events, coordinator)
        .await
        .unwrap();
    wait_until(|| page.controller_id().is_some()).await;
    (page, handle)
}

async fn prompt_shown(handle: &mut CoordinatorHandle) {
    tokio::time::timeout(Duration::from_secs(5), handle.wait_for_prompt(PromptState::Shown))
        .await
        .expect("prompt not shown in time")
        .unwrap();
}

#[tokio::test]
async fn test_update_end_to_end() {
    let site = Site::new(&[("/a.js", "a"), ("/b.js", "b"), ("/c.js", "c")]);
    site.deploy(&config(1, &["/", "/a.js", "/b.js"]));

    let (page, mut coordinator) = start_page(&site, CoordinatorConfig::default()).await;
    let v1 = page.controller_id();
    assert_eq!(site.origin.cache_names().await, vec!["app-v1"]);

    // First visit: controlled without a prompt or a reload.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.prompt(), PromptState::None);
    assert_eq!(page.reload_count(), 0);

    site.deploy(&config(2, &["/", "/a.js", "/b.js", "/c.js"]));
    coordinator.check_now();
    prompt_shown(&mut coordinator).await;

    assert!(page.is_prompt_visible());
    assert_eq!(page.controller_id(), v1);
    assert_eq!(site.origin.cache_names().await, vec!["app-v1", "app-v2"]);

    coordinator.apply();
    wait_until(|| page.reload_count() == 1).await;

    assert!(!page.is_prompt_visible());
    assert_ne!(page.controller_id(), v1);
    assert_eq!(site.origin.cache_names().await, vec!["app-v2"]);

    site.server.clear_requests();
    let response = site.container.get(&page, "/c.js").await.unwrap();
    assert!(response.from_cache);
    assert_eq!(site.server.request_count("/c.js"), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(page.reload_count(), 1);
    assert!(coordinator.is_finished());
}

#[tokio::test]
async fn test_dismissed_update_stays_waiting() {
    let site = Site::new(&[("/a.js", "a")]);
    site.deploy(&config(1, &["/a.js"]));
    let (page, mut coordinator) = start_page(&site, CoordinatorConfig::default()).await;
    let v1 = page.controller_id();

    site.deploy(&config(2, &["/a.js"]));
    coordinator.check_now();
    prompt_shown(&mut coordinator).await;

    coordinator.dismiss();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.prompt(), PromptState::Dismissed);
    assert!(!page.is_prompt_visible());
    assert_eq!(page.controller_id(), v1);

    // The waiting worker is still announced on the next page load.
    let (_second, second_coordinator) =
        start_page(&site, CoordinatorConfig::default()).await;
    assert_eq!(second_coordinator.prompt(), PromptState::Shown);

    second_coordinator.apply();
    wait_until(|| page.reload_count() == 1).await;
    assert_eq!(site.origin.cache_names().await, vec!["app-v2"]);
    assert_eq!(second_coordinator.prompt(), PromptState::Applying);
}

#[tokio::test]
async fn test_newer_waiting_worker_keeps_single_prompt() {
    let site = Site::new(&[("/a.js", "a")]);
    site.deploy(&config(1, &["/a.js"]));
    let (page, mut coordinator) = start_page(&site, CoordinatorConfig::default()).await;

    site.deploy(&config(2, &["/a.js"]));
    coordinator.check_now();
    prompt_shown(&mut coordinator).await;

    let registration = site.container.registration("/").await.unwrap();
    let v2 = registration.waiting().unwrap();

    site.deploy(&config(3, &["/a.js"]));
    registration.update().await.unwrap();
    let v3 = registration.waiting().unwrap();
    assert_ne!(v2.id(), v3.id());
    wait_until(|| v2.state() == pwacache_worker::WorkerState::Redundant).await;
    assert_eq!(coordinator.prompt(), PromptState::Shown);

    coordinator.apply();
    wait_until(|| page.reload_count() == 1).await;
    assert_eq!(page.controller_id(), Some(v3.id()));
    assert_eq!(site.origin.cache_names().await, vec!["app-v3"]);
}

#[tokio::test]
async fn test_auto_apply_reloads_once() {
    let site = Site::new(&[("/a.js", "a")]);
    site.deploy(&config(1, &["/a.js"]));
    let coordinator_config = CoordinatorConfig {
        prompt: PromptPolicy::AutoApply { after_ms: 100 },
        ..Default::default()
    };
    let (page, mut coordinator) = start_page(&site, coordinator_config).await;

    site.deploy(&config(2, &["/a.js"]));
    coordinator.check_now();
    prompt_shown(&mut coordinator).await;

    wait_until(|| page.reload_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(page.reload_count(), 1);
    assert_eq!(site.origin.cache_names().await, vec!["app-v2"]);
}

#[tokio::test]
async fn test_immediate_activation_reloads_without_confirmation() {
    let site = Site::new(&[("/a.js", "a")]);
    site.deploy(&config(1, &["/a.js"]));
    let (page, coordinator) = start_page(&site, CoordinatorConfig::default()).await;

    let mut v2 = config(2, &["/a.js"]);
    v2.activation = ActivationPolicy::Immediate;
    site.deploy(&v2);
    coordinator.check_now();

    wait_until(|| page.reload_count() == 1).await;
    assert_eq!(site.origin.cache_names().await, vec!["app-v2"]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(page.reload_count(), 1);
}

#[tokio::test]
async fn test_visibility_triggers_update_check() {
    let site = Site::new(&[("/a.js", "a")]);
    site.deploy(&config(1, &["/a.js"]));
    let (page, mut coordinator) = start_page(&site, CoordinatorConfig::default()).await;

    site.deploy(&config(2, &["/a.js"]));
    page.set_visible(false);
    page.set_visible(true);

    prompt_shown(&mut coordinator).await;
}

#[tokio::test]
async fn test_failed_update_check_is_not_fatal() {
    let site = Site::new(&[("/a.js", "a")]);
    site.deploy(&config(1, &["/a.js"]));
    let (page, mut coordinator) = start_page(&site, CoordinatorConfig::default()).await;

    site.server.set_offline(true);
    coordinator.check_now();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!coordinator.is_finished());

    // Offline, the controlled page still loads its assets.
    assert_eq!(site.body(&page, "/a.js").await, "a");

    site.server.set_offline(false);
    site.deploy(&config(2, &["/a.js"]));
    coordinator.check_now();
    prompt_shown(&mut coordinator).await;
}
