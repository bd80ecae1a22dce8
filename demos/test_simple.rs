use simkernel::prelude::*;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("🚀 Запуск тестовой симуляции");

    let config = KernelConfig {
        name: "тест".to_string(),
        tick_length: 0.001,
        ..KernelConfig::default()
    };
    let sim = Simulator::new(config)?.with_tracing();

    // Простой процесс, который использует wait
    sim.start(process_fn("wait_test", |ctx: Context| async move {
        info!("Начинаю ждать 3 секунды");
        ctx.wait_seconds(3.0, DEFAULT_PRIORITY, true, None).await?;
        info!("Ожидание завершено в {:.3} сек", ctx.current_seconds());
        Ok::<(), SimError>(())
    }))?;

    // Процесс, стартующий позже и ждущий в тактах
    sim.start_after(1.0, process_fn("tick_test", |ctx: Context| async move {
        for step in 1..=3 {
            ctx.wait(500).await?;
            info!("Шаг {} на такте {}", step, ctx.current_tick());
        }
        Ok::<(), SimError>(())
    }))?;

    println!("▶️  Запуск симуляции...\n");
    let reason = sim.run_for(10.0).await?;

    println!("\n✅ Симуляция остановлена: {reason:?}, время {}", sim.now());
    println!("{}", serde_json::to_string_pretty(&sim.stats())?);

    Ok(())
}
