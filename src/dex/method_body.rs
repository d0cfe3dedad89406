//! A method's instruction stream under construction.
//!
//! Instructions can be inserted, replaced and removed while labels, debug entries
//! and try/catch boundaries keep pointing at the same logical place. Each position
//! is a [`LocationId`] in a [`Locations`] arena. One extra position past the last
//! instruction marks the end of the method, so ranges can end there.

use crate::dex::error::DexError;
use crate::dex::location::{ItemId, LocatedItemsCursor, LocationError, LocationId, Locations};
use log::debug;

/// One decoded instruction, kept as raw code units. The low byte of the first unit is the opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    units: Vec<u16>,
}

impl Instruction {
    pub fn from_units(units: Vec<u16>) -> Result<Instruction, DexError> {
        if units.is_empty() {
            fail!("an instruction needs at least one code unit");
        }
        Ok(Instruction { units })
    }

    pub fn nop() -> Instruction {
        Instruction { units: vec![0x0000] }
    }

    pub fn opcode(&self) -> u8 {
        (self.units[0] & 0x00ff) as u8
    }

    pub fn code_units(&self) -> usize {
        self.units.len()
    }

    pub fn units(&self) -> &[u16] {
        &self.units
    }
}

/// Entries of the debug_info state machine that are tied to a code address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugItem {
    LineNumber(u32),
    PrologueEnd,
    EpilogueBegin,
    StartLocal {
        register: u16,
        name: Option<String>,
        type_descriptor: Option<String>,
    },
    EndLocal(u16),
    RestartLocal(u16),
    SetSourceFile(Option<String>),
}

/// Anything anchored to an instruction position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodItem {
    Label(String),
    Debug(DebugItem),
}

/// A try range and its handler, expressed with labels so it survives edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryBlock {
    pub start: ItemId,
    pub end: ItemId,
    pub handler: ItemId,
    /// `None` is a catch-all handler.
    pub exception_type: Option<String>,
}

/// A try block with its labels turned into code addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTryBlock {
    pub start_address: u32,
    pub code_unit_count: u32,
    pub handler_address: u32,
    pub exception_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MethodBody {
    register_count: u16,
    instructions: Vec<Instruction>,
    // positions[i] anchors instructions[i]; the final entry is the end of the method
    positions: Vec<LocationId>,
    locations: Locations<MethodItem>,
    try_blocks: Vec<TryBlock>,
}

impl MethodBody {
    pub fn new(register_count: u16) -> Self {
        let mut locations = Locations::new();
        let end = locations.new_location(0);
        MethodBody {
            register_count,
            instructions: vec![],
            positions: vec![end],
            locations,
            try_blocks: vec![],
        }
    }

    pub fn from_instructions(register_count: u16, instructions: Vec<Instruction>) -> Self {
        let mut body = MethodBody::new(register_count);
        for instruction in instructions {
            body.push_instruction(instruction);
        }
        body
    }

    pub fn register_count(&self) -> u16 {
        self.register_count
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn locations(&self) -> &Locations<MethodItem> {
        &self.locations
    }

    pub fn try_blocks(&self) -> &[TryBlock] {
        &self.try_blocks
    }

    /// Position of instruction `index`; `index == len()` is the end of the method.
    pub fn location(&self, index: usize) -> Result<LocationId, LocationError> {
        self.positions.get(index).copied().ok_or(LocationError::InvalidIndex {
            index,
            len: self.instructions.len(),
        })
    }

    /// Append an instruction. Items placed at the end of the method now sit on it.
    pub fn push_instruction(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
        let end = self.locations.new_location(self.instructions.len());
        self.positions.push(end);
    }

    /// Insert before the instruction currently at `index`, which keeps its items.
    pub fn add_instruction(
        &mut self,
        index: usize,
        instruction: Instruction,
    ) -> Result<(), LocationError> {
        let len = self.instructions.len();
        if index > len {
            return Err(LocationError::InvalidIndex { index, len });
        }
        if index == len {
            self.push_instruction(instruction);
            return Ok(());
        }
        let location = self.locations.new_location(index);
        self.instructions.insert(index, instruction);
        self.positions.insert(index, location);
        self.reindex(index + 1);
        Ok(())
    }

    pub fn replace_instruction(
        &mut self,
        index: usize,
        instruction: Instruction,
    ) -> Result<Instruction, LocationError> {
        let len = self.instructions.len();
        match self.instructions.get_mut(index) {
            Some(slot) => Ok(std::mem::replace(slot, instruction)),
            None => Err(LocationError::InvalidIndex { index, len }),
        }
    }

    /// Remove instruction `index`. Its items fold into the following position, ahead of
    /// the items already there.
    pub fn remove_instruction(&mut self, index: usize) -> Result<Instruction, LocationError> {
        let len = self.instructions.len();
        if index >= len {
            return Err(LocationError::InvalidIndex { index, len });
        }
        let removed = self.positions.remove(index);
        let instruction = self.instructions.remove(index);
        let next = self.positions[index];
        debug!(
            "removing instruction {} (opcode 0x{:02x}), folding {} item(s) into the next position",
            index,
            instruction.opcode(),
            self.locations.len(removed)
        );
        self.locations.merge_items_into(removed, next);
        self.reindex(index);
        Ok(instruction)
    }

    fn reindex(&mut self, from: usize) {
        for i in from..self.positions.len() {
            self.locations.set_index(self.positions[i], i);
        }
    }

    fn new_item_at(&mut self, index: usize, item: MethodItem) -> Result<ItemId, LocationError> {
        let location = self.location(index)?;
        let id = self.locations.new_item(item);
        self.locations.attach(id, location)?;
        Ok(id)
    }

    pub fn new_label(&mut self, index: usize, name: &str) -> Result<ItemId, LocationError> {
        self.new_item_at(index, MethodItem::Label(name.to_string()))
    }

    pub fn add_debug_item(
        &mut self,
        index: usize,
        item: DebugItem,
    ) -> Result<ItemId, LocationError> {
        self.new_item_at(index, MethodItem::Debug(item))
    }

    /// Move an existing item to instruction `index`.
    pub fn move_item(&mut self, item: ItemId, index: usize) -> Result<(), LocationError> {
        let location = self.location(index)?;
        self.locations.detach(item);
        self.locations.attach(item, location)
    }

    pub fn cursor(
        &mut self,
        index: usize,
    ) -> Result<LocatedItemsCursor<'_, MethodItem>, LocationError> {
        let location = self.location(index)?;
        Ok(self.locations.cursor(location))
    }

    pub fn add_try_block(
        &mut self,
        start: ItemId,
        end: ItemId,
        handler: ItemId,
        exception_type: Option<&str>,
    ) {
        self.try_blocks.push(TryBlock {
            start,
            end,
            handler,
            exception_type: exception_type.map(str::to_string),
        });
    }

    /// Code address of every position, including the end of the method.
    pub fn code_addresses(&self) -> Vec<u32> {
        let mut addresses = Vec::with_capacity(self.positions.len());
        let mut address = 0u32;
        addresses.push(address);
        for instruction in &self.instructions {
            address += instruction.code_units() as u32;
            addresses.push(address);
        }
        addresses
    }

    fn live_index(&self, item: ItemId) -> Option<usize> {
        let location = self.locations.location_of(item)?;
        let index = self.locations.index(location);
        (self.positions.get(index) == Some(&location)).then_some(index)
    }

    /// Code address of a placed item, `None` if it is not placed in this body.
    pub fn address_of(&self, item: ItemId) -> Option<u32> {
        let index = self.live_index(item)?;
        Some(self.code_addresses()[index])
    }

    /// Every placed item with its code address, in stream order.
    pub fn items_in_order(&self) -> Vec<(u32, &MethodItem)> {
        let addresses = self.code_addresses();
        self.positions
            .iter()
            .zip(addresses)
            .flat_map(|(location, address)| {
                self.locations
                    .items(*location)
                    .iter()
                    .map(move |item| (address, self.locations.value(*item)))
            })
            .collect()
    }

    pub fn debug_items(&self) -> Vec<(u32, &DebugItem)> {
        self.items_in_order()
            .into_iter()
            .filter_map(|(address, item)| match item {
                MethodItem::Debug(d) => Some((address, d)),
                MethodItem::Label(_) => None,
            })
            .collect()
    }

    pub fn labels(&self) -> Vec<(u32, &str)> {
        self.items_in_order()
            .into_iter()
            .filter_map(|(address, item)| match item {
                MethodItem::Label(name) => Some((address, name.as_str())),
                MethodItem::Debug(_) => None,
            })
            .collect()
    }

    fn label_address(&self, item: ItemId, role: &str) -> Result<u32, DexError> {
        match self.address_of(item) {
            Some(address) => Ok(address),
            None => fail!("{} label {:?} is not placed", role, self.locations.value(item)),
        }
    }

    /// Turn every try block into addresses. Empty or inverted ranges are rejected.
    pub fn resolve_try_blocks(&self) -> Result<Vec<ResolvedTryBlock>, DexError> {
        let mut resolved = Vec::with_capacity(self.try_blocks.len());
        for (i, block) in self.try_blocks.iter().enumerate() {
            let in_block = |e| err!(e, "try block #{}", i);
            let start = self.label_address(block.start, "try start").map_err(in_block)?;
            let end = self.label_address(block.end, "try end").map_err(in_block)?;
            let handler = self.label_address(block.handler, "catch handler").map_err(in_block)?;
            if end <= start {
                fail!(("empty try range {}..{}", start, end), ("try block #{}", i));
            }
            resolved.push(ResolvedTryBlock {
                start_address: start,
                code_unit_count: end - start,
                handler_address: handler,
                exception_type: block.exception_type.clone(),
            });
        }
        Ok(resolved)
    }
}
