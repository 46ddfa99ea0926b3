//! 排队叫号演示程序
//!
//! 使用内存存储走一遍挂号、取号、叫号、就诊和过号流程，
//! 同时订阅事件中心打印显示屏会收到的事件。

use anyhow::Result;
use simrs_core::{utils::fixed_offset, EventPublisher, NewPatient};
use simrs_integration::EventHub;
use simrs_workflow::{InMemoryQueue, InMemoryRegistry, QueueService, RegistrationService};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("🚀 启动排队叫号演示");

    let offset = fixed_offset(7)?;
    let hub = EventHub::new(64);
    let listener = hub.spawn_listener("demo", |event| {
        info!("📣 事件 {} -> {}", event.kind.as_str(), event.payload);
    });

    let registry = Arc::new(InMemoryRegistry::new());
    let publisher: Arc<dyn EventPublisher> = Arc::new(hub.clone());
    let registration = RegistrationService::new(registry.clone(), offset);
    let queue = QueueService::new(Arc::new(InMemoryQueue::new()), registry, publisher, offset);

    // 1. 科室与患者
    let poli = registration.create_polyclinic("PU", "Poli Umum").await?;
    let mut patients = Vec::new();
    for name in ["Budi Santoso", "Siti Aminah", "Agus Wijaya"] {
        let patient = registration
            .register_patient(NewPatient {
                nik: None,
                name: name.to_string(),
                sex: None,
                birth_date: None,
                phone: None,
                address: None,
            })
            .await?;
        info!("📝 登记患者 {} 病历号 {}", patient.name, patient.medical_record_number);
        patients.push(patient);
    }

    // 2. 取号
    for patient in &patients {
        let ticket = queue.take_number(poli.id, Some(patient.id), None).await?;
        info!("🎫 {} 取号 {}", patient.name, ticket.code);
    }

    // 3. 叫号、就诊、完成
    let first = queue.call_next(poli.id, None).await?;
    info!("🔔 叫号 {}", first.code);
    queue.serve(first.id, None).await?;
    let done = queue.complete(first.id, None).await?;
    info!("✅ {} 就诊完成", done.code);

    // 4. 过号
    let second = queue.call_next(poli.id, None).await?;
    queue.recall(second.id, None).await?;
    let skipped = queue.skip(second.id, None).await?;
    info!("⏭️  {} 叫号 {} 次未到，已过号", skipped.code, skipped.call_count);

    let third = queue.call_next(poli.id, None).await?;
    info!("🔔 叫号 {}", third.code);

    // 5. 显示屏
    let board = queue.board(poli.id, None).await?;
    info!("🖥️  显示屏数据:\n{}", serde_json::to_string_pretty(&board)?);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    listener.abort();
    info!("✅ 排队叫号演示完成");
    Ok(())
}
