use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use simkernel::prelude::*;
use tracing::info;

const TELLERS: usize = 2;
const CLIENTS: usize = 8;

/// Занять свободного кассира, если он есть
fn try_take(free: &AtomicUsize) -> bool {
    free.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn client(id: usize, free: Arc<AtomicUsize>, served: Arc<AtomicUsize>) -> impl ProcessTarget {
    process_fn(format!("клиент {id}"), move |ctx: Context| async move {
        info!("Клиент {} пришёл в банк в {:.2} сек", id, ctx.current_seconds());

        // несколько ожидающих могут проснуться на одного кассира
        while !try_take(&free) {
            let f = free.clone();
            ctx.wait_until(move || f.load(Ordering::SeqCst) > 0, None).await?;
        }

        let service = rand::thread_rng().gen_range(3.0..7.0);
        info!("Клиент {} у кассира, обслуживание {:.1} сек", id, service);
        ctx.wait_seconds(service, DEFAULT_PRIORITY, true, None).await?;

        free.fetch_add(1, Ordering::SeqCst);
        served.fetch_add(1, Ordering::SeqCst);
        info!("Клиент {} обслужен и уходит в {:.2} сек", id, ctx.current_seconds());
        Ok::<(), SimError>(())
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Инициализируем логирование
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("🏦 Симуляция банка");
    println!("==================\n");

    let config = KernelConfig {
        name: "банк".to_string(),
        tick_length: 0.001,
        ..KernelConfig::default()
    };
    let sim = Simulator::new(config)?;

    let free = Arc::new(AtomicUsize::new(TELLERS));
    let served = Arc::new(AtomicUsize::new(0));

    // Генератор создаёт клиентов с интервалами 2-5 секунд
    let (f, s) = (free.clone(), served.clone());
    sim.start(process_fn("генератор", move |ctx: Context| async move {
        info!("Генератор запущен");
        for i in 1..=CLIENTS {
            let pause = rand::thread_rng().gen_range(2.0..5.0);
            ctx.wait_seconds(pause, DEFAULT_PRIORITY, true, None).await?;
            ctx.schedule_ticks(0, DEFAULT_PRIORITY, true, client(i, f.clone(), s.clone()), None)?;
        }
        info!("Генератор завершил работу");
        Ok::<(), SimError>(())
    }))?;

    let reason = sim.run_for(120.0).await?;

    println!("\n📊 Статистика симуляции ({reason:?}):");
    println!("   Обслужено клиентов: {}", served.load(Ordering::SeqCst));
    println!("{}", serde_json::to_string_pretty(&sim.stats())?);

    Ok(())
}
