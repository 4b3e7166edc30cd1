//! Core storage: one or two 32768-word banks, and the two access
//! paths onto them.
//!
//! The *physical* path (`read_physical`/`write_physical`) performs no
//! checking at all; it is the contract offered to the loader and the
//! operator display, and it is the path the data channels use (channel
//! programs are pre-validated by privileged code, so the channel
//! engines deliberately do not bounds-check them).
//!
//! The *logical* path applies the timesharing extension: the
//! relocation offset is added first (when relocation mode is active),
//! the A/B bank is selected per access stream, and then — only when
//! user mode is active — the address must fall inside the protection
//! window, expressed in 256-word blocks.  A violation aborts the
//! access entirely; the caller turns it into a protection trap.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use tracing::{event, Level};

use base::prelude::*;
use base::{ADDR_MASK, BANK_SIZE, BLOCK_SHIFT, PHYS_ADDR_MASK};

/// Whether an access fetches from the instruction stream or the data
/// stream; the timesharing extension gives each stream its own bank
/// selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Instruction,
    Data,
}

/// Which of the two core banks an access goes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub enum BankSelect {
    #[default]
    A,
    B,
}

impl BankSelect {
    fn bank_bit(self) -> u16 {
        match self {
            BankSelect::A => 0,
            BankSelect::B => BANK_SIZE as u16,
        }
    }
}

/// A snapshot of the relocation/protection registers governing one
/// logical access.  The execute loop builds this from the register
/// file; keeping it a plain value keeps the memory unit free of any
/// dependency on the register file's layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mapping {
    pub relocate: bool,
    pub user_mode: bool,
    /// When set, logical data *stores* are discarded (storage
    /// nullification mode); reads are unaffected.
    pub nullify_stores: bool,
    /// Relocation value, an 8-bit block number: the offset added to
    /// every relocated address is `reloc_block * 256`.
    pub reloc_block: u16,
    /// Protection window, inclusive on both ends, in blocks.
    pub start_block: u16,
    pub limit_block: u16,
    pub instruction_bank: BankSelect,
    pub data_bank: BankSelect,
}

/// A failed logical access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryFault {
    /// User-mode access outside the protection window.  The access
    /// did not happen: no partial effect.
    Protection { logical: Address, physical: Address },
}

impl Display for MemoryFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            MemoryFault::Protection { logical, physical } => write!(
                f,
                "user-mode access to {logical:o} (physical {physical:o}) is outside the protection window"
            ),
        }
    }
}

impl Error for MemoryFault {}

pub struct MemoryConfiguration {
    /// Fit the second (B) core bank.
    pub dual_banks: bool,
}

/// Core storage.
#[derive(Debug)]
pub struct CoreMemory {
    words: Vec<Word>,
    dual_banks: bool,
}

impl CoreMemory {
    #[must_use]
    pub fn new(config: &MemoryConfiguration) -> CoreMemory {
        let banks = if config.dual_banks { 2 } else { 1 };
        CoreMemory {
            words: vec![Word::ZERO; (BANK_SIZE as usize) * banks],
            dual_banks: config.dual_banks,
        }
    }

    fn offset(&self, addr: Address) -> usize {
        let a = if self.dual_banks {
            addr.bits() & PHYS_ADDR_MASK
        } else {
            addr.in_bank()
        };
        usize::from(a)
    }

    /// Unchecked read; the loader/display and channel contract.
    #[must_use]
    pub fn read_physical(&self, addr: Address) -> Word {
        self.words[self.offset(addr)]
    }

    /// Unchecked write; the loader and channel contract.
    pub fn write_physical(&mut self, addr: Address, value: Word) {
        let offset = self.offset(addr);
        self.words[offset] = value;
    }

    /// Translate a 15-bit logical address to a physical address,
    /// applying relocation, bank selection and the user-mode bounds
    /// check.  The bounds registers are not consulted unless user
    /// mode is active.
    pub fn map(&self, mapping: &Mapping, addr: Address, stream: Stream) -> Result<Address, MemoryFault> {
        let mut a = addr.in_bank();
        if mapping.relocate {
            a = a.wrapping_add(mapping.reloc_block << BLOCK_SHIFT) & ADDR_MASK;
        }
        let bank = match stream {
            Stream::Instruction => mapping.instruction_bank,
            Stream::Data => mapping.data_bank,
        };
        let physical = Address::new(a | bank.bank_bit());
        if mapping.user_mode {
            let block = physical.block();
            if block < mapping.start_block || block > mapping.limit_block {
                event!(
                    Level::DEBUG,
                    "protection violation: logical {:o} physical {:o} block {:o} outside [{:o}, {:o}]",
                    addr,
                    physical,
                    block,
                    mapping.start_block,
                    mapping.limit_block,
                );
                return Err(MemoryFault::Protection {
                    logical: addr,
                    physical,
                });
            }
        }
        Ok(physical)
    }

    /// Logical data read.
    pub fn read_logical(&self, mapping: &Mapping, addr: Address) -> Result<Word, MemoryFault> {
        let physical = self.map(mapping, addr, Stream::Data)?;
        Ok(self.read_physical(physical))
    }

    /// Logical data write.  In storage-nullification mode the mapping
    /// and protection check still happen but the store is discarded.
    pub fn write_logical(
        &mut self,
        mapping: &Mapping,
        addr: Address,
        value: Word,
    ) -> Result<(), MemoryFault> {
        let physical = self.map(mapping, addr, Stream::Data)?;
        if mapping.nullify_stores {
            event!(Level::TRACE, "store to {:o} nullified", physical);
            return Ok(());
        }
        self.write_physical(physical, value);
        Ok(())
    }

    /// Logical instruction fetch: like a read but through the
    /// instruction-stream bank selector.
    pub fn fetch_instruction(&self, mapping: &Mapping, addr: Address) -> Result<Word, MemoryFault> {
        let physical = self.map(mapping, addr, Stream::Instruction)?;
        Ok(self.read_physical(physical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dual() -> CoreMemory {
        CoreMemory::new(&MemoryConfiguration { dual_banks: true })
    }

    #[test]
    fn physical_access_round_trips() {
        let mut mem = dual();
        let addr = Address::new(0o1234);
        mem.write_physical(addr, Word::new(0o123456701234));
        assert_eq!(mem.read_physical(addr), Word::new(0o123456701234));
    }

    #[test]
    fn single_bank_aliases_the_bank_bit() {
        let mut mem = CoreMemory::new(&MemoryConfiguration { dual_banks: false });
        mem.write_physical(Address::new(0o100000 | 0o42), Word::new(7));
        assert_eq!(mem.read_physical(Address::new(0o42)), Word::new(7));
    }

    #[test]
    fn relocation_adds_blocks() {
        let mut mem = dual();
        let mapping = Mapping {
            relocate: true,
            reloc_block: 2, // offset 0o1000
            ..Mapping::default()
        };
        mem.write_physical(Address::new(0o1005), Word::new(0o55));
        assert_eq!(
            mem.read_logical(&mapping, Address::new(0o5)),
            Ok(Word::new(0o55))
        );
    }

    #[test]
    fn bank_selectors_split_streams() {
        let mut mem = dual();
        let mapping = Mapping {
            instruction_bank: BankSelect::B,
            data_bank: BankSelect::A,
            ..Mapping::default()
        };
        mem.write_physical(Address::new(0o100), Word::new(1));
        mem.write_physical(Address::new(0o100000 | 0o100), Word::new(2));
        assert_eq!(
            mem.read_logical(&mapping, Address::new(0o100)),
            Ok(Word::new(1))
        );
        assert_eq!(
            mem.fetch_instruction(&mapping, Address::new(0o100)),
            Ok(Word::new(2))
        );
    }

    #[test]
    fn bounds_checked_only_in_user_mode() {
        let mut mem = dual();
        let mut mapping = Mapping {
            user_mode: true,
            start_block: 2,
            limit_block: 3,
            ..Mapping::default()
        };
        // Inside the window: blocks 2..=3 are addresses 0o1000-0o1777.
        assert!(mem.write_logical(&mapping, Address::new(0o1000), Word::new(1)).is_ok());
        assert!(mem.read_logical(&mapping, Address::new(0o1777)).is_ok());
        // Outside.
        assert!(matches!(
            mem.read_logical(&mapping, Address::new(0o0777)),
            Err(MemoryFault::Protection { .. })
        ));
        assert!(matches!(
            mem.write_logical(&mapping, Address::new(0o2000), Word::new(1)),
            Err(MemoryFault::Protection { .. })
        ));
        // Same addresses succeed as soon as user mode is off, and the
        // window is never consulted.
        mapping.user_mode = false;
        assert!(mem.read_logical(&mapping, Address::new(0o0777)).is_ok());
        assert!(mem.write_logical(&mapping, Address::new(0o2000), Word::new(1)).is_ok());
    }

    #[test]
    fn failed_write_has_no_partial_effect() {
        let mut mem = dual();
        let mapping = Mapping {
            user_mode: true,
            start_block: 4,
            limit_block: 4,
            ..Mapping::default()
        };
        assert!(mem
            .write_logical(&mapping, Address::new(0o100), Word::new(0o777))
            .is_err());
        assert_eq!(mem.read_physical(Address::new(0o100)), Word::ZERO);
    }

    #[test]
    fn nullification_discards_stores_but_not_reads() {
        let mut mem = dual();
        let mapping = Mapping {
            nullify_stores: true,
            ..Mapping::default()
        };
        mem.write_physical(Address::new(0o50), Word::new(0o33));
        assert!(mem
            .write_logical(&mapping, Address::new(0o50), Word::new(0o44))
            .is_ok());
        assert_eq!(
            mem.read_logical(&mapping, Address::new(0o50)),
            Ok(Word::new(0o33))
        );
    }
}
