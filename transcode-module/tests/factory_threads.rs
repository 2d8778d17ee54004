//! Factory refcounting under concurrent create/destroy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use transcode_module::{
    Module, ModuleCatalog, ModuleClass, ModuleFactory, ModuleFeatures, ModuleInfo, OptionString,
    Result, SessionParams,
};

struct Counted {
    live: Arc<AtomicUsize>,
    finalized: Arc<AtomicUsize>,
}

impl Module for Counted {
    fn init(&mut self) -> Result<()> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn fini(&mut self) -> Result<()> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.finalized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn configure(&mut self, _options: &OptionString, _session: &SessionParams) -> Result<()> {
        Ok(())
    }
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
    fn inspect(&self, _query: &str) -> Result<String> {
        Ok(String::new())
    }
}

fn factory(live: &Arc<AtomicUsize>, finalized: &Arc<AtomicUsize>) -> Arc<ModuleFactory> {
    let mut catalog = ModuleCatalog::new();
    for name in ["resize", "denoise"] {
        let live = Arc::clone(live);
        let finalized = Arc::clone(finalized);
        catalog
            .register(
                ModuleClass::Filter,
                ModuleInfo::new(name, ModuleFeatures::FILTER | ModuleFeatures::VIDEO),
                move || {
                    Box::new(Counted {
                        live: Arc::clone(&live),
                        finalized: Arc::clone(&finalized),
                    })
                },
            )
            .unwrap();
    }
    Arc::new(ModuleFactory::new(catalog))
}

#[test]
fn test_concurrent_create_destroy() {
    let live = Arc::new(AtomicUsize::new(0));
    let finalized = Arc::new(AtomicUsize::new(0));
    let factory = factory(&live, &finalized);

    let threads: Vec<_> = (0..8)
        .map(|i| {
            let factory = Arc::clone(&factory);
            let name = if i % 2 == 0 { "resize" } else { "denoise" };
            thread::spawn(move || {
                for _ in 0..50 {
                    let instance = factory.create(ModuleClass::Filter, name).unwrap();
                    assert!(factory.refcount(ModuleClass::Filter, name).unwrap_or(0) >= 1);
                    factory.destroy(instance).unwrap();
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert_eq!(finalized.load(Ordering::SeqCst), 400);
    assert_eq!(factory.instance_count(), 0);
    assert_eq!(factory.plugin_count(), 0);
}

#[test]
fn test_held_instance_keeps_module_loaded() {
    let live = Arc::new(AtomicUsize::new(0));
    let finalized = Arc::new(AtomicUsize::new(0));
    let factory = factory(&live, &finalized);

    let held = factory.create(ModuleClass::Filter, "resize").unwrap();
    let threads: Vec<_> = (0..4)
        .map(|_| {
            let factory = Arc::clone(&factory);
            thread::spawn(move || {
                for _ in 0..25 {
                    let instance = factory.create(ModuleClass::Filter, "resize").unwrap();
                    factory.destroy(instance).unwrap();
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    // Never dropped to zero, so never unloaded.
    assert_eq!(factory.refcount(ModuleClass::Filter, "resize"), Some(1));
    assert!(factory.unload(ModuleClass::Filter, "resize").is_err());

    factory.destroy(held).unwrap();
    assert_eq!(factory.refcount(ModuleClass::Filter, "resize"), None);
    assert_eq!(factory.plugin_count(), 0);
}
