//! 离线同步演示
//!
//! 展示离线时进度如何在队列中合并并持久化，恢复网络后自动同步

use async_trait::async_trait;
use progress_sdk::{
    NetworkStatus, PlaybackTick, ProgressPayload, ProgressRemote, ProgressSDK, ProgressSDKConfig,
    SDKEvent, StaticIdentityProvider, TimeFormatter, TrackingTarget, UserIdentity,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// 只打印请求的远端
#[derive(Debug)]
struct ConsoleRemote;

#[async_trait]
impl ProgressRemote for ConsoleRemote {
    async fn send_progress(&self, payload: &ProgressPayload) -> progress_sdk::Result<()> {
        println!(
            "   ☁️ POST /progress {}/{} {:.2}% completed={}",
            payload.course_id, payload.chapter_id, payload.progress, payload.completed
        );
        Ok(())
    }

    async fn fetch_completed_chapters(
        &self,
        _course_id: &str,
        _user_id: &str,
    ) -> progress_sdk::Result<Vec<String>> {
        Ok(vec!["ch-0".to_string()])
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n🚀 离线进度同步演示\n");
    println!("====================================\n");

    let config = ProgressSDKConfig::builder()
        .data_dir("/tmp/progress_offline_demo")
        .initial_network_status(NetworkStatus::Offline)
        .build();
    let identity = Arc::new(StaticIdentityProvider::new(UserIdentity::Authenticated(
        "demo-user".into(),
    )));

    println!("📦 正在初始化 SDK...");
    let sdk = ProgressSDK::initialize_with_remote(config, identity, Arc::new(ConsoleRemote)).await?;
    println!("✅ SDK 初始化完成\n");

    let mut events = sdk.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SDKEvent::ChapterCompleted { chapter_id, .. } => {
                    println!("   🎓 章节完成广播: {}", chapter_id)
                }
                SDKEvent::ProgressSynced { video_id, .. } => println!("   ✅ 已同步: {}", video_id),
                other => println!("   📣 {}", other.event_type()),
            }
        }
    });

    let tracker = sdk.tracker();
    tracker.on_milestone(|percent| println!("   🎯 里程碑 {}%", percent));
    if let Some(resume) = tracker.start(
        TrackingTarget::new("rust-101", "intro")
            .with_chapter("ch-1")
            .with_duration(600.0),
    )? {
        println!("⏯️ 从 {} 继续播放", TimeFormatter::format_playback_position(resume.played_seconds));
    }

    println!("【离线播放】");
    for step in 1..=10 {
        let played = step as f64 / 10.0;
        tracker.on_progress(PlaybackTick::new(played, played * 600.0))?;
        sleep(Duration::from_millis(50)).await;
    }
    println!("   队列积压: {} 条\n", sdk.queue().pending_len());

    println!("【恢复网络】");
    sdk.set_network_status(NetworkStatus::Online);
    sleep(Duration::from_millis(500)).await;
    println!("   队列积压: {} 条\n", sdk.queue().pending_len());

    println!("【合并服务端进度】");
    let added = sdk.sync_course_from_server("rust-101").await?;
    println!(
        "   新增 {} 章，已完成: {:?}\n",
        added,
        sdk.store().completed_chapters("rust-101")
    );

    sdk.shutdown().await?;
    println!("👋 演示结束");
    Ok(())
}
