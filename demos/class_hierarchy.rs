use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use init_barrier::{Directory, Unit};
use tracing_subscriber::EnvFilter;

static BASE_RUNS: AtomicUsize = AtomicUsize::new(0);
static DERIVED_RUNS: AtomicUsize = AtomicUsize::new(0);

fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env())
      .init();

   let directory = Arc::new(Directory::new());
   let base = Unit::new("Base", |_| {
      // This initializer runs only once
      BASE_RUNS.fetch_add(1, Ordering::Relaxed);
      println!("Initializing Base...");
      thread::sleep(Duration::from_millis(50));
      Ok(())
   });
   let derived = Unit::with_parent("Derived", &base, |ctx| {
      DERIVED_RUNS.fetch_add(1, Ordering::Relaxed);
      println!("Initializing Derived...");
      // Touching ourselves from the initializer does not deadlock.
      ctx.ensure_initialized(ctx.unit())?;
      Ok(())
   });

   // Trigger the subclass first; the base still initializes before it.
   let threads: Vec<_> = (0..5)
      .map(|i| {
         let directory = Arc::clone(&directory);
         let unit = if i % 2 == 0 { Arc::clone(&derived) } else { Arc::clone(&base) };
         thread::spawn(move || {
            directory.ensure_initialized(&unit).unwrap();
            println!("Thread {i}: {} ready", unit.id());
         })
      })
      .collect();

   for t in threads {
      t.join().unwrap();
   }

   assert_eq!(BASE_RUNS.load(Ordering::Relaxed), 1);
   assert_eq!(DERIVED_RUNS.load(Ordering::Relaxed), 1);
   println!("Directory: {directory:?}");
}
