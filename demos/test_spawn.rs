use simkernel::prelude::*;
use tracing::info;

fn child(n: u32) -> impl ProcessTarget {
    process_fn(format!("child_{n}"), move |ctx: Context| async move {
        info!("Дочерний процесс {} запущен в {:.1} сек", n, ctx.current_seconds());
        ctx.wait_seconds(2.0, DEFAULT_PRIORITY, true, None).await?;
        info!("Дочерний процесс {} завершен в {:.1} сек", n, ctx.current_seconds());
        Ok::<(), SimError>(())
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("🧪 Тест порождения процессов");
    println!("============================\n");

    let config = KernelConfig {
        tick_length: 0.1,
        ..KernelConfig::default()
    };
    let sim = Simulator::new(config)?;

    sim.start(process_fn("parent", |ctx: Context| async move {
        info!("Родительский процесс начал работу в {:.1} сек", ctx.current_seconds());
        ctx.wait_seconds(1.0, DEFAULT_PRIORITY, true, None).await?;

        info!("Создаю дочерний процесс 1");
        ctx.schedule_ticks(0, DEFAULT_PRIORITY, true, child(1), None)?;
        ctx.wait_seconds(1.0, DEFAULT_PRIORITY, true, None).await?;

        // второй ребёнок запланирован надолго, но будет прерван
        let late = EventHandle::new();
        info!("Планирую дочерний процесс 2 через 60 сек");
        ctx.schedule_seconds(60.0, DEFAULT_PRIORITY, true, child(2), Some(&late))?;
        ctx.wait_seconds(1.0, DEFAULT_PRIORITY, true, None).await?;
        info!("Не жду: прерываю и запускаю процесс 2 сейчас");
        ctx.interrupt_event(&late).await?;

        // третий отменяется, не начавшись
        let doomed = EventHandle::new();
        ctx.schedule_seconds(5.0, DEFAULT_PRIORITY, true, child(3), Some(&doomed))?;
        ctx.kill_event(&doomed)?;
        info!("Дочерний процесс 3 отменен");

        info!("Родительский процесс завершен в {:.1} сек", ctx.current_seconds());
        Ok::<(), SimError>(())
    }))?;

    println!("▶️  Запуск симуляции...\n");
    sim.run_for(10.0).await?;

    let stats = sim.stats();
    println!("\n📊 Статистика:");
    println!("   Время: {} сек", stats["time"]);
    println!("   Свободных исполнителей: {}", stats["idle_workers"]);

    Ok(())
}
