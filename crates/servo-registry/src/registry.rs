use crate::{ArmDescriptor, JointSlot, ProtocolFamily, RegistryError, Result};
use serde::Serialize;
use servo_transport::BusAddress;
use std::collections::BTreeMap;
use tracing::warn;

/// Highest address a servo may be given; 0xFE is broadcast, 0xFF is part of the header.
const MAX_ASSIGNABLE: u8 = 0xFD;

/// Current binding of one joint slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotEntry {
    pub slot: JointSlot,
    pub address: BusAddress,
    pub family: ProtocolFamily,
}

/// A validated address change, not yet applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reassignment {
    pub slot: JointSlot,
    pub family: ProtocolFamily,
    pub old: BusAddress,
    pub new: BusAddress,
}

impl Reassignment {
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

/// Slot → address table plus one roster per protocol family.
///
/// The rosters are disjoint and together hold exactly the addresses of the slot table; every
/// constructor and mutator keeps it that way.
#[derive(Debug, Clone)]
pub struct ServoRegistry {
    slots: Vec<SlotEntry>,
    sts: BTreeMap<BusAddress, JointSlot>,
    scs: BTreeMap<BusAddress, JointSlot>,
}

impl ServoRegistry {
    /// Slots are numbered through `sts` first, then `scs`, in the given order.
    pub fn new(sts: &[BusAddress], scs: &[BusAddress]) -> Result<Self> {
        if sts.is_empty() && scs.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut reg = Self {
            slots: Vec::with_capacity(sts.len() + scs.len()),
            sts: BTreeMap::new(),
            scs: BTreeMap::new(),
        };
        let listed = sts
            .iter()
            .map(|a| (*a, ProtocolFamily::Sts))
            .chain(scs.iter().map(|a| (*a, ProtocolFamily::Scs)));
        for (address, family) in listed {
            if address.raw() > MAX_ASSIGNABLE {
                return Err(RegistryError::ReservedAddress(address));
            }
            if reg.contains(address) {
                return Err(RegistryError::DuplicateAddress(address));
            }
            let slot = JointSlot(reg.slots.len());
            reg.roster_mut(family).insert(address, slot);
            reg.slots.push(SlotEntry {
                slot,
                address,
                family,
            });
        }
        Ok(reg)
    }

    pub fn from_descriptor(desc: &ArmDescriptor) -> Result<Self> {
        let sts: Vec<BusAddress> = desc.families.sts.iter().map(|a| BusAddress(*a)).collect();
        let scs: Vec<BusAddress> = desc.families.scs.iter().map(|a| BusAddress(*a)).collect();
        Self::new(&sts, &scs)
    }

    fn roster(&self, family: ProtocolFamily) -> &BTreeMap<BusAddress, JointSlot> {
        match family {
            ProtocolFamily::Sts => &self.sts,
            ProtocolFamily::Scs => &self.scs,
        }
    }

    fn roster_mut(&mut self, family: ProtocolFamily) -> &mut BTreeMap<BusAddress, JointSlot> {
        match family {
            ProtocolFamily::Sts => &mut self.sts,
            ProtocolFamily::Scs => &mut self.scs,
        }
    }

    /// Strict lookup: fails for an address on neither roster.
    pub fn try_classify(&self, address: BusAddress) -> Result<ProtocolFamily> {
        if self.sts.contains_key(&address) {
            Ok(ProtocolFamily::Sts)
        } else if self.scs.contains_key(&address) {
            Ok(ProtocolFamily::Scs)
        } else {
            Err(RegistryError::UnknownAddress(address))
        }
    }

    /// Lookup used for dispatch: unknown addresses fall back to [`ProtocolFamily::DEFAULT`].
    pub fn classify(&self, address: BusAddress) -> ProtocolFamily {
        self.try_classify(address).unwrap_or_else(|_| {
            warn!(%address, fallback = %ProtocolFamily::DEFAULT, "address on no roster");
            ProtocolFamily::DEFAULT
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[SlotEntry] {
        &self.slots
    }

    pub fn entry(&self, slot: JointSlot) -> Result<SlotEntry> {
        self.slots
            .get(slot.index())
            .copied()
            .ok_or(RegistryError::UnknownSlot(slot))
    }

    pub fn address_of(&self, slot: JointSlot) -> Result<BusAddress> {
        self.entry(slot).map(|e| e.address)
    }

    /// Current addresses in slot order.
    pub fn addresses(&self) -> Vec<BusAddress> {
        self.slots.iter().map(|e| e.address).collect()
    }

    /// Addresses of one family, in slot order.
    pub fn roster_addresses(&self, family: ProtocolFamily) -> Vec<BusAddress> {
        self.slots
            .iter()
            .filter(|e| e.family == family)
            .map(|e| e.address)
            .collect()
    }

    pub fn contains(&self, address: BusAddress) -> bool {
        self.sts.contains_key(&address) || self.scs.contains_key(&address)
    }

    pub fn slot_of(&self, address: BusAddress) -> Option<JointSlot> {
        self.sts
            .get(&address)
            .or_else(|| self.scs.get(&address))
            .copied()
    }

    /// Validate moving the servo at `old` to `new` without touching the table.
    pub fn plan_reassign(&self, old: BusAddress, new: BusAddress) -> Result<Reassignment> {
        let family = self
            .try_classify(old)
            .map_err(|_| RegistryError::AddressNotFound(old))?;
        let slot = self
            .roster(family)
            .get(&old)
            .copied()
            .ok_or(RegistryError::AddressNotFound(old))?;
        if old != new {
            if new.raw() > MAX_ASSIGNABLE {
                return Err(RegistryError::ReservedAddress(new));
            }
            if self.contains(new) {
                return Err(RegistryError::AddressConflict(new));
            }
        }
        Ok(Reassignment {
            slot,
            family,
            old,
            new,
        })
    }

    /// Apply a planned change. The plan is re-validated first, so a stale plan fails
    /// without modifying anything.
    pub fn apply(&mut self, plan: &Reassignment) -> Result<()> {
        let current = self.plan_reassign(plan.old, plan.new)?;
        if current != *plan {
            return Err(RegistryError::AddressNotFound(plan.old));
        }
        if plan.is_noop() {
            return Ok(());
        }
        let roster = self.roster_mut(plan.family);
        roster.remove(&plan.old);
        roster.insert(plan.new, plan.slot);
        self.slots[plan.slot.index()].address = plan.new;
        Ok(())
    }

    /// Rosters disjoint and in one-to-one correspondence with the slot table.
    pub fn is_consistent(&self) -> bool {
        let disjoint = self.sts.keys().all(|a| !self.scs.contains_key(a));
        let sized = self.sts.len() + self.scs.len() == self.slots.len();
        let mapped = self
            .slots
            .iter()
            .all(|e| self.roster(e.family).get(&e.address) == Some(&e.slot));
        disjoint && sized && mapped
    }
}
