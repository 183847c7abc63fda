//! The never-eliminate stub optimizer: normally a dylib's
//! `__TEXT,__stubs` entries get rewritten to branch straight to the
//! resolved target and the stub bytes are dropped, but a small set of
//! stubs must be preserved because something outside the cache still
//! branches to their fixed address.

use std::collections::BTreeSet;

use dylibcache_types::InputDylibVMAddress;

/// One stub's classification: either safe to eliminate (rewritten callers
/// branch directly to the target) or pinned (callers outside our view may
/// still reach this exact address).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubDisposition {
    Eliminate,
    Preserve,
}

/// Tracks which stub addresses in a dylib must survive stub elimination,
/// per "never-eliminate" list: stubs referenced by the
/// unwind-info's personality routines, and stubs whose target binds to a
/// weak-imported symbol (where the bind could legitimately resolve to a
/// missing weak symbol and callers must keep retrying through the stub).
#[derive(Debug, Default)]
pub struct StubOptimizer {
    preserve: BTreeSet<u64>,
}

impl StubOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_preserved(&mut self, stub_vm_address: InputDylibVMAddress) {
        self.preserve.insert(stub_vm_address.raw());
    }

    pub fn mark_personality_routine(&mut self, stub_vm_address: InputDylibVMAddress) {
        self.mark_preserved(stub_vm_address);
    }

    pub fn mark_weak_import_target(&mut self, stub_vm_address: InputDylibVMAddress) {
        self.mark_preserved(stub_vm_address);
    }

    pub fn disposition(&self, stub_vm_address: InputDylibVMAddress) -> StubDisposition {
        if self.preserve.contains(&stub_vm_address.raw()) {
            StubDisposition::Preserve
        } else {
            StubDisposition::Eliminate
        }
    }

    pub fn preserved_count(&self) -> usize {
        self.preserve.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmarked_stubs_are_eliminated() {
        let optimizer = StubOptimizer::new();
        assert_eq!(optimizer.disposition(InputDylibVMAddress(0x1000)), StubDisposition::Eliminate);
    }

    #[test]
    fn personality_routine_stubs_are_preserved() {
        let mut optimizer = StubOptimizer::new();
        optimizer.mark_personality_routine(InputDylibVMAddress(0x2000));
        assert_eq!(optimizer.disposition(InputDylibVMAddress(0x2000)), StubDisposition::Preserve);
        assert_eq!(optimizer.preserved_count(), 1);
    }

    #[test]
    fn weak_import_target_stubs_are_preserved() {
        let mut optimizer = StubOptimizer::new();
        optimizer.mark_weak_import_target(InputDylibVMAddress(0x3000));
        assert_eq!(optimizer.disposition(InputDylibVMAddress(0x3000)), StubDisposition::Preserve);
    }
}
