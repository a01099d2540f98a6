//! Compilation statistics.
//!
//! Workers bump atomic counters; [`CompilationStats::snapshot`] copies them
//! into a plain [`StatsSnapshot`] that can be merged across runs and dumped.

use oatc_dex::InvokeType;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

macro_rules! counters {
    ($($(#[$doc:meta])* $variant:ident => $field:ident,)*) => {
        /// A scalar statistic.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Counter {
            $($(#[$doc])* $variant,)*
        }

        impl Counter {
            pub const ALL: &'static [Counter] = &[$(Counter::$variant,)*];
        }

        const COUNTER_COUNT: usize = [$(stringify!($variant)),*].len();

        /// Plain copy of the statistics of one or more runs.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
        pub struct StatsSnapshot {
            $(pub $field: usize,)*
            pub resolved_methods: [usize; InvokeType::COUNT],
            pub unresolved_methods: [usize; InvokeType::COUNT],
            pub virtual_made_direct: [usize; InvokeType::COUNT],
            pub direct_calls_to_boot: [usize; InvokeType::COUNT],
            pub direct_methods_to_boot: [usize; InvokeType::COUNT],
        }

        impl StatsSnapshot {
            pub fn get(&self, counter: Counter) -> usize {
                match counter {
                    $(Counter::$variant => self.$field,)*
                }
            }

            fn set(&mut self, counter: Counter, value: usize) {
                match counter {
                    $(Counter::$variant => self.$field = value,)*
                }
            }

            /// Merge statistics from another run
            pub fn merge(&mut self, other: &StatsSnapshot) {
                $(self.$field += other.$field;)*
                for i in 0..InvokeType::COUNT {
                    self.resolved_methods[i] += other.resolved_methods[i];
                    self.unresolved_methods[i] += other.unresolved_methods[i];
                    self.virtual_made_direct[i] += other.virtual_made_direct[i];
                    self.direct_calls_to_boot[i] += other.direct_calls_to_boot[i];
                    self.direct_methods_to_boot[i] += other.direct_methods_to_boot[i];
                }
            }
        }
    };
}

counters! {
    /// Type assumed present in the dex cache at run time.
    TypeInDexCache => types_in_dex_cache,
    TypeNotInDexCache => types_not_in_dex_cache,
    StringInDexCache => strings_in_dex_cache,
    StringNotInDexCache => strings_not_in_dex_cache,
    /// Type access check elided.
    ResolvedType => resolved_types,
    UnresolvedType => unresolved_types,
    ResolvedInstanceField => resolved_instance_fields,
    UnresolvedInstanceField => unresolved_instance_fields,
    /// Static field of the referrer's own class.
    ResolvedLocalStaticField => resolved_local_static_fields,
    ResolvedStaticField => resolved_static_fields,
    UnresolvedStaticField => unresolved_static_fields,
    /// Virtual call made direct because the receiver type is known.
    TypeBasedDevirtualization => type_based_devirtualization,
    SafeCast => safe_casts,
    NotSafeCast => not_safe_casts,
    ClassResolved => classes_resolved,
    ClassUnresolved => classes_unresolved,
    ClassVerified => classes_verified,
    ClassSoftFailed => classes_soft_failed,
    ClassHardFailed => classes_hard_failed,
    ClassInitialized => classes_initialized,
    MethodCompiled => methods_compiled,
    JniMethodCompiled => jni_methods_compiled,
    DexToDexCompiled => dex_to_dex_compiled,
    /// Abstract, code-less or unsupported native methods.
    MethodSkipped => methods_skipped,
    /// Backend reported an error.
    MethodFailed => methods_failed,
}

type PerInvoke = [AtomicUsize; InvokeType::COUNT];

/// Live counters shared by all workers of a run.
#[derive(Debug, Default)]
pub struct CompilationStats {
    counters: [AtomicUsize; COUNTER_COUNT],
    resolved_methods: PerInvoke,
    unresolved_methods: PerInvoke,
    virtual_made_direct: PerInvoke,
    direct_calls_to_boot: PerInvoke,
    direct_methods_to_boot: PerInvoke,
}

impl CompilationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: usize) {
        self.counters[counter as usize].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> usize {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    pub fn resolved_method(&self, kind: InvokeType) {
        self.resolved_methods[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn unresolved_method(&self, kind: InvokeType) {
        self.unresolved_methods[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// A call of `kind` was sharpened to a direct call.
    pub fn virtual_made_direct(&self, kind: InvokeType) {
        self.virtual_made_direct[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn direct_call_to_boot(&self, kind: InvokeType) {
        self.direct_calls_to_boot[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn direct_method_to_boot(&self, kind: InvokeType) {
        self.direct_methods_to_boot[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |a: &PerInvoke| std::array::from_fn(|i| a[i].load(Ordering::Relaxed));
        let mut snapshot = StatsSnapshot {
            resolved_methods: load(&self.resolved_methods),
            unresolved_methods: load(&self.unresolved_methods),
            virtual_made_direct: load(&self.virtual_made_direct),
            direct_calls_to_boot: load(&self.direct_calls_to_boot),
            direct_methods_to_boot: load(&self.direct_methods_to_boot),
            ..StatsSnapshot::default()
        };
        for &counter in Counter::ALL {
            snapshot.set(counter, self.get(counter));
        }
        snapshot
    }

    pub fn dump(&self) {
        let snapshot = self.snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(json) => info!(stats = %json, "compilation statistics"),
            Err(err) => info!(error = %err, "compilation statistics unavailable"),
        }
        for kind in InvokeType::ALL {
            let i = kind.index();
            info!(
                %kind,
                resolved = snapshot.resolved_methods[i],
                unresolved = snapshot.unresolved_methods[i],
                made_direct = snapshot.virtual_made_direct[i],
                direct_calls_to_boot = snapshot.direct_calls_to_boot[i],
                direct_methods_to_boot = snapshot.direct_methods_to_boot[i],
                "invoke statistics"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_copies_every_counter() {
        let stats = CompilationStats::new();
        stats.inc(Counter::MethodCompiled);
        stats.add(Counter::MethodCompiled, 2);
        stats.inc(Counter::SafeCast);
        stats.virtual_made_direct(InvokeType::Virtual);
        let snap = stats.snapshot();
        assert_eq!(snap.methods_compiled, 3);
        assert_eq!(snap.get(Counter::SafeCast), 1);
        assert_eq!(snap.virtual_made_direct[InvokeType::Virtual.index()], 1);
        assert_eq!(Counter::ALL.len(), COUNTER_COUNT);
    }

    #[test]
    fn test_merge() {
        let mut a = StatsSnapshot {
            methods_compiled: 2,
            ..StatsSnapshot::default()
        };
        let mut b = StatsSnapshot {
            methods_compiled: 5,
            methods_failed: 1,
            ..StatsSnapshot::default()
        };
        b.resolved_methods[InvokeType::Static.index()] = 4;
        a.merge(&b);
        assert_eq!(a.methods_compiled, 7);
        assert_eq!(a.methods_failed, 1);
        assert_eq!(a.resolved_methods[InvokeType::Static.index()], 4);
    }
}
