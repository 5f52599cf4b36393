use std::sync::Arc;
use std::thread;

use init_barrier::{Directory, InitError, Unit};
use tracing_subscriber::EnvFilter;

fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env())
      .init();

   let directory = Arc::new(Directory::new());
   let database = Unit::new("Database", |_| {
      println!("Attempting initialization...");
      Err("connection refused".into())
   });
   let repository = Unit::with_parent("Repository", &database, |_| {
      unreachable!("parent failed, so this never runs")
   });

   // The initializing call sees the real cause.
   match directory.ensure_initialized(&database) {
      Ok(()) => panic!("Should have failed"),
      Err(e) => {
         println!("Owner caught: {e}");
         println!("Original cause: {:?}", e.into_cause());
      }
   }

   // Everyone else gets a wrapper naming the unit, without a retry.
   let other = {
      let directory = Arc::clone(&directory);
      let database = Arc::clone(&database);
      thread::spawn(move || directory.ensure_initialized(&database))
   };
   match other.join().unwrap() {
      Err(e @ InitError::Unavailable { .. }) => println!("Other thread caught: {e}"),
      other => panic!("Unexpected outcome: {other:?}"),
   }

   // Dependents fail without running their own initializer.
   if let Err(e) = directory.ensure_initialized(&repository) {
      println!("Dependent caught: {e}");
   }
}
