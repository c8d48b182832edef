//! Class layouts: the shared, immutable per-class side of an object.
//!
//! A layout owns the name-to-(member, slot) index built once at
//! finalization. Every instance of the class borrows the layout through
//! an `Rc` and sizes its slot array from it.

use crate::error::DeclarationError;
use crate::member::{Member, MemberIndex};
use lattice_core::{intern, InternedString};
use std::rc::Rc;

/// Immutable description of a class: its name and member index.
pub struct ClassLayout {
    name: InternedString,
    index: MemberIndex,
}

impl ClassLayout {
    /// Finalize a layout from an ordered member list.
    ///
    /// Order is meaningful: it fixes slot numbering and the iteration
    /// order of [`ClassLayout::members`].
    pub fn build(
        name: &str,
        members: Vec<(InternedString, Rc<Member>)>,
    ) -> Result<Rc<Self>, DeclarationError> {
        let index = MemberIndex::build(name, members)?;
        Ok(Rc::new(Self {
            name: intern(name),
            index,
        }))
    }

    /// The class name.
    #[inline]
    pub fn name(&self) -> &InternedString {
        &self.name
    }

    /// Look up a member and its slot by name.
    #[inline]
    pub fn lookup(&self, name: &InternedString) -> Option<(&Rc<Member>, u32)> {
        self.index.lookup(name)
    }

    /// Number of members, which is also the per-instance slot count.
    #[inline]
    pub fn member_count(&self) -> usize {
        self.index.len()
    }

    /// Iterate members in slot order.
    pub fn members(&self) -> impl Iterator<Item = (&InternedString, &Rc<Member>)> {
        self.index.iter()
    }
}

impl std::fmt::Debug for ClassLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassLayout")
            .field("name", &self.name)
            .field("members", &self.member_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_lookup() {
        let layout = ClassLayout::build(
            "Point",
            vec![
                (intern("x"), Member::new("x")),
                (intern("y"), Member::new("y")),
            ],
        )
        .unwrap();
        assert_eq!(layout.name().as_str(), "Point");
        assert_eq!(layout.member_count(), 2);
        assert_eq!(layout.lookup(&intern("x")).unwrap().1, 0);
        assert_eq!(layout.lookup(&intern("y")).unwrap().1, 1);
        assert!(layout.lookup(&intern("z")).is_none());
    }

    #[test]
    fn test_members_iterate_in_slot_order() {
        let layout = ClassLayout::build(
            "C",
            vec![
                (intern("b"), Member::new("b")),
                (intern("a"), Member::new("a")),
            ],
        )
        .unwrap();
        let names: Vec<&str> = layout.members().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn test_duplicate_member_fails_finalization() {
        let result = ClassLayout::build(
            "C",
            vec![
                (intern("a"), Member::new("a")),
                (intern("a"), Member::new("a")),
            ],
        );
        assert!(matches!(
            result.unwrap_err(),
            DeclarationError::DuplicateMember { .. }
        ));
    }

    #[test]
    fn test_cloned_member_usable_in_second_layout() {
        let member = Member::new("shared");
        let _first = ClassLayout::build("A", vec![(intern("shared"), member.clone())]).unwrap();
        let second = ClassLayout::build("B", vec![(intern("shared"), member.clone_unlinked())]);
        assert!(second.is_ok());
    }
}
