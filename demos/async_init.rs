use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use init_barrier::{Directory, Initiator, Unit};
use tracing_subscriber::EnvFilter;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

#[tokio::main]
async fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env())
      .init();

   let directory = Arc::new(Directory::new());
   let service = Unit::new("Service", |_| {
      // This initializer runs only once
      COUNTER.fetch_add(1, Ordering::Relaxed);
      println!("Initializing service...");
      std::thread::sleep(std::time::Duration::from_millis(50));
      Ok(())
   });

   let tasks: Vec<_> = (0..5)
      .map(|i| {
         let directory = Arc::clone(&directory);
         let service = Arc::clone(&service);
         tokio::spawn(async move {
            // Tasks carry their own logical initiator.
            directory
               .ensure_initialized_async(&service, Initiator::fresh())
               .await
               .unwrap();
            println!("Task {i}: service ready");
         })
      })
      .collect();

   for t in tasks {
      t.await.unwrap();
   }

   assert!(directory.is_initialized("Service"));
   assert_eq!(COUNTER.load(Ordering::Relaxed), 1); // Initializer ran only once
}
