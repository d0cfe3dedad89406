//! Items anchored to positions of a mutable instruction stream.
//!
//! A method body under construction owns one [`Locations`] arena. Every instruction
//! position gets a [`LocationId`], and labels, debug entries or try boundaries are
//! allocated as items ([`ItemId`]) that point back at the location they are attached to.
//! Each location keeps its own list of items, allocated on first use. Most
//! positions carry nothing and therefore cost nothing.
//!
//! When two positions fold into one (an instruction is removed and its position
//! becomes the start of the following instruction), [`Locations::merge_items_into`]
//! moves the items over in a single step, keeping their relative order.
//!
//! ```
//! use dexlink::dex::location::Locations;
//!
//! let mut locations: Locations<&str> = Locations::new();
//! let first = locations.new_location(0);
//! let second = locations.new_location(1);
//! let label = locations.new_item(":start");
//! locations.attach(label, first).unwrap();
//!
//! locations.merge_items_into(first, second);
//! assert_eq!(locations.location_of(label), Some(second));
//! assert_eq!(locations.items(second), &[label]);
//! ```

use thiserror::Error;

/// Handle of a position inside one method's instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationId(u32);

/// Handle of an item allocated in a [`Locations`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("item {item:?} is already placed at {current:?}, cannot attach it to {requested:?}")]
    OwnershipViolation {
        item: ItemId,
        current: LocationId,
        requested: LocationId,
    },
    #[error("cursor has no current item to remove")]
    IllegalCursorState,
    #[error("instruction index {index} out of range (0..={len})")]
    InvalidIndex { index: usize, len: usize },
}

/// Items attached to a single location. `None` until something is attached.
#[derive(Debug, Clone, Default)]
pub struct LocatedItems {
    items: Option<Vec<ItemId>>,
}

impl LocatedItems {
    pub fn as_slice(&self) -> &[ItemId] {
        self.items.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether backing storage exists. Read-only access never allocates it.
    pub fn is_allocated(&self) -> bool {
        self.items.is_some()
    }

    fn push(&mut self, item: ItemId) {
        self.items.get_or_insert_with(Vec::new).push(item);
    }

    fn remove(&mut self, item: ItemId) -> bool {
        let Some(v) = self.items.as_mut() else {
            return false;
        };
        match v.iter().position(|i| *i == item) {
            Some(pos) => {
                v.remove(pos);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
struct LocationSlot {
    index: usize,
    items: LocatedItems,
}

#[derive(Debug, Clone)]
struct ItemSlot<T> {
    value: T,
    location: Option<LocationId>,
}

/// Arena owning every location and item of one method body.
#[derive(Debug, Clone)]
pub struct Locations<T> {
    locations: Vec<LocationSlot>,
    items: Vec<ItemSlot<T>>,
}

impl<T> Default for Locations<T> {
    fn default() -> Self {
        Locations {
            locations: vec![],
            items: vec![],
        }
    }
}

impl<T> Locations<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_location(&mut self, index: usize) -> LocationId {
        let id = LocationId(self.locations.len() as u32);
        self.locations.push(LocationSlot {
            index,
            items: LocatedItems::default(),
        });
        id
    }

    /// Allocate an unplaced item.
    pub fn new_item(&mut self, value: T) -> ItemId {
        let id = ItemId(self.items.len() as u32);
        self.items.push(ItemSlot { value, location: None });
        id
    }

    pub fn index(&self, location: LocationId) -> usize {
        self.locations[location.0 as usize].index
    }

    pub(crate) fn set_index(&mut self, location: LocationId, index: usize) {
        self.locations[location.0 as usize].index = index;
    }

    pub fn value(&self, item: ItemId) -> &T {
        &self.items[item.0 as usize].value
    }

    pub fn value_mut(&mut self, item: ItemId) -> &mut T {
        &mut self.items[item.0 as usize].value
    }

    pub fn location_of(&self, item: ItemId) -> Option<LocationId> {
        self.items[item.0 as usize].location
    }

    pub fn located_items(&self, location: LocationId) -> &LocatedItems {
        &self.locations[location.0 as usize].items
    }

    pub fn items(&self, location: LocationId) -> &[ItemId] {
        self.located_items(location).as_slice()
    }

    pub fn len(&self, location: LocationId) -> usize {
        self.located_items(location).len()
    }

    pub fn is_empty(&self, location: LocationId) -> bool {
        self.located_items(location).is_empty()
    }

    /// Place `item` at `location`. An item already placed anywhere is rejected and left untouched.
    pub fn attach(&mut self, item: ItemId, location: LocationId) -> Result<(), LocationError> {
        let slot = &mut self.items[item.0 as usize];
        if let Some(current) = slot.location {
            return Err(LocationError::OwnershipViolation {
                item,
                current,
                requested: location,
            });
        }
        slot.location = Some(location);
        self.locations[location.0 as usize].items.push(item);
        Ok(())
    }

    /// Remove `item` from its location, leaving it unplaced. Returns the location it was at.
    pub fn detach(&mut self, item: ItemId) -> Option<LocationId> {
        let location = self.items[item.0 as usize].location.take()?;
        self.locations[location.0 as usize].items.remove(item);
        Some(location)
    }

    pub fn cursor(&mut self, location: LocationId) -> LocatedItemsCursor<'_, T> {
        LocatedItemsCursor {
            arena: self,
            location,
            next: 0,
            last: None,
        }
    }

    /// Fold every item of `from` into `into`.
    ///
    /// The items of `from` are re-pointed at `into` and come first in the combined list,
    /// followed by whatever `into` held before. `from` is left with no items.
    pub fn merge_items_into(&mut self, from: LocationId, into: LocationId) {
        if from == into {
            return;
        }
        let Some(mut moved) = self.locations[from.0 as usize].items.items.take() else {
            return;
        };
        for item in &moved {
            self.items[item.0 as usize].location = Some(into);
        }
        let target = &mut self.locations[into.0 as usize].items;
        if let Some(existing) = target.items.take() {
            moved.extend(existing);
        }
        target.items = Some(moved);
    }
}

/// Bounded cursor over the items of one location.
///
/// `remove` only ever affects the item most recently returned by `next`, and
/// clears that item's location before dropping it from the list.
pub struct LocatedItemsCursor<'a, T> {
    arena: &'a mut Locations<T>,
    location: LocationId,
    next: usize,
    last: Option<usize>,
}

impl<T> LocatedItemsCursor<'_, T> {
    pub fn location(&self) -> LocationId {
        self.location
    }

    pub fn value(&self, item: ItemId) -> &T {
        self.arena.value(item)
    }

    pub fn remove(&mut self) -> Result<ItemId, LocationError> {
        let pos = self.last.take().ok_or(LocationError::IllegalCursorState)?;
        let slot = &mut self.arena.locations[self.location.0 as usize].items;
        let item = match slot.items.as_mut() {
            Some(v) if pos < v.len() => v.remove(pos),
            _ => return Err(LocationError::IllegalCursorState),
        };
        self.arena.items[item.0 as usize].location = None;
        self.next = pos;
        Ok(item)
    }

    /// Attach `item` to this cursor's location, appending after the existing items.
    pub fn add(&mut self, item: ItemId) -> Result<(), LocationError> {
        self.arena.attach(item, self.location)?;
        self.last = None;
        Ok(())
    }
}

impl<T> Iterator for LocatedItemsCursor<'_, T> {
    type Item = ItemId;

    fn next(&mut self) -> Option<ItemId> {
        let item = *self.arena.items(self.location).get(self.next)?;
        self.last = Some(self.next);
        self.next += 1;
        Some(item)
    }
}
