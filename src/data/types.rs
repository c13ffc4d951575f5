use std::fmt::{self, Formatter};

use crate::arch;
use crate::intern::InternedStr;
pub use tag_ref::TagRef;

mod tag_ref {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::ObjectDef;

    thread_local!(
        /// The global storage for all struct and union definitions.
        ///
        /// The type is read like so:
        /// RefCell: A container with interior mutability, used because `LocalKey`
        /// returns an immutable reference.
        /// Vec: A growable list of definitions.
        /// Rc: A hack so that the definition can be handed out across function
        /// boundaries, see the documentation for `TagRef::get`.
        static TAGS: RefCell<Vec<Rc<ObjectDef>>> = Default::default()
    );

    /// A reference to a struct or union definition.
    ///
    /// A tag names exactly one definition for the whole translation unit, so
    /// every type that mentions the tag shares this reference; that is what
    /// allows self-referencing structs and forward declarations.
    #[derive(Copy, Clone, Debug, Eq)]
    pub struct TagRef(usize);

    impl PartialEq for TagRef {
        fn eq(&self, other: &Self) -> bool {
            // see if we can do this the cheap way first;
            // otherwise fall back to comparing every member
            self.0 == other.0 || self.get() == other.get()
        }
    }

    impl Default for TagRef {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TagRef {
        /// Create a reference to a new, empty definition.
        pub fn new() -> TagRef {
            TAGS.with(|list| {
                let mut tags = list.borrow_mut();
                let index = tags.len();
                tags.push(Rc::new(ObjectDef::default()));
                TagRef(index)
            })
        }

        /// Return the definition for this tag.
        ///
        /// An undefined forward declaration has an empty member list and
        /// size zero.
        // Implementation hack: because thread_local items cannot be returned
        // from a closure, this uses an Rc so that it can be `clone`d cheaply.
        pub fn get(self) -> Rc<ObjectDef> {
            TAGS.with(|list| list.borrow()[self.0].clone())
        }

        /// Fill in the definition for this tag.
        ///
        /// It is a logic error to use this for anything other than defining
        /// a forward-declared tag; a tag body may be filled in only once.
        pub(crate) fn update(self, def: ObjectDef) {
            TAGS.with(|list| {
                let mut tags = list.borrow_mut();
                debug_assert!(tags[self.0].members.is_empty(), "tag defined twice");
                tags[self.0] = Rc::new(def);
            });
        }
    }
}

/// A C type.
///
/// The size of a type is computed, not stored; a size of zero means the type
/// is incomplete. The two sanctioned in-place completions (filling in a
/// forward-declared tag body, and completing an unbounded array from its
/// initializer) go through [`TagRef::update`] and the owning symbol
/// respectively, so a `Type` value itself never changes.
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Void,
    Integer { size: u64, signed: bool },
    Real { size: u64 },
    Pointer(Box<Type>, Qualifiers),
    Array(Box<Type>, ArrayLength),
    Function(FunctionType),
    /// A struct or union. Named objects share their definition through the
    /// tag registry; anonymous ones carry it along.
    Object(ObjectType),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArrayLength {
    Fixed(u64),
    /// `int a[]`: the element count is supplied later, by an initializer.
    Incomplete,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ObjectType {
    Named(InternedStr, TagRef),
    Anonymous(std::rc::Rc<ObjectDef>),
}

/// The laid-out body of a struct or union.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectDef {
    pub members: Vec<Member>,
    pub size: u64,
}

/// One member of an object type, or one parameter of a function type.
///
/// Parameters use an offset of 0 and may have an empty name (`int f(int)`).
#[derive(Clone, Debug, PartialEq)]
pub struct Member {
    pub name: InternedStr,
    pub ctype: Type,
    pub offset: u64,
}

#[derive(Clone, Debug)]
pub struct FunctionType {
    pub return_type: Box<Type>,
    pub params: Vec<Member>,
    pub varargs: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Qualifiers {
    pub c_const: bool,
    pub volatile: bool,
}

impl Qualifiers {
    pub(crate) const NONE: Qualifiers = Qualifiers {
        c_const: false,
        volatile: false,
    };
}

impl ObjectDef {
    /// Lay out the members in declaration order: each member goes at the next
    /// offset aligned for its type, and the object size is the final offset
    /// rounded up to the strictest member alignment.
    pub(crate) fn layout(fields: Vec<(InternedStr, Type)>) -> ObjectDef {
        let mut members = Vec::with_capacity(fields.len());
        let mut offset = 0;
        let mut align = 1;
        for (name, ctype) in fields {
            let member_align = ctype.alignment();
            align = align.max(member_align);
            offset = arch::round_up(offset, member_align);
            let size = ctype.size();
            members.push(Member {
                name,
                ctype,
                offset,
            });
            offset += size;
        }
        ObjectDef {
            members,
            size: arch::round_up(offset, align),
        }
    }
}

impl ObjectType {
    /// The definition, regardless of which variant this is.
    pub fn def(&self) -> std::rc::Rc<ObjectDef> {
        match self {
            ObjectType::Named(_, tag) => tag.get(),
            ObjectType::Anonymous(def) => def.clone(),
        }
    }
}

impl Type {
    pub const fn integer(size: u64) -> Type {
        Type::Integer { size, signed: true }
    }
    pub const fn unsigned(size: u64) -> Type {
        Type::Integer {
            size,
            signed: false,
        }
    }
    pub const fn real(size: u64) -> Type {
        Type::Real { size }
    }
    /// The default `int` every declaration starts from.
    pub const fn int() -> Type {
        Type::integer(arch::INT_SIZE)
    }
    pub const fn char() -> Type {
        Type::integer(arch::CHAR_SIZE)
    }
    pub fn pointer(to: Type) -> Type {
        Type::Pointer(Box::new(to), Qualifiers::NONE)
    }
    pub fn array(element: Type, length: ArrayLength) -> Type {
        Type::Array(Box::new(element), length)
    }

    /// The size in bytes; zero means the type is incomplete.
    pub fn size(&self) -> u64 {
        match self {
            Type::Void => 0,
            Type::Integer { size, .. } | Type::Real { size } => *size,
            Type::Pointer(_, _) => arch::PTR_SIZE,
            Type::Array(element, ArrayLength::Fixed(len)) => element.size() * len,
            Type::Array(_, ArrayLength::Incomplete) => 0,
            Type::Function(_) => 0,
            Type::Object(object) => object.def().size,
        }
    }

    pub fn alignment(&self) -> u64 {
        match self {
            Type::Array(element, _) => element.alignment(),
            Type::Object(object) => object
                .def()
                .members
                .iter()
                .map(|m| m.ctype.alignment())
                .max()
                .unwrap_or(1),
            _ => arch::natural_alignment(self.size()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.size() != 0
    }
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Integer { .. })
    }
    pub fn is_signed(&self) -> bool {
        matches!(self, Type::Integer { signed: true, .. })
    }
    pub fn is_real(&self) -> bool {
        matches!(self, Type::Real { .. })
    }
    pub fn is_arithmetic(&self) -> bool {
        self.is_integer() || self.is_real()
    }
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_, _))
    }
    pub fn is_function(&self) -> bool {
        matches!(self, Type::Function(_))
    }
    pub fn is_object(&self) -> bool {
        matches!(self, Type::Object(_))
    }
    /// <https://stackoverflow.com/questions/14821936/what-is-a-scalar-object-in-c#14822074>
    pub fn is_scalar(&self) -> bool {
        self.is_arithmetic() || self.is_pointer()
    }

    /// The type this one refers to: the pointee, the array element, or the
    /// function return type.
    pub fn referenced(&self) -> Option<&Type> {
        match self {
            Type::Pointer(to, _) => Some(to),
            Type::Array(element, _) => Some(element),
            Type::Function(func) => Some(&func.return_type),
            _ => None,
        }
    }

    pub fn object(&self) -> Option<std::rc::Rc<ObjectDef>> {
        match self {
            Type::Object(object) => Some(object.def()),
            _ => None,
        }
    }

    /// Complete an unbounded array from an initializer of the same element
    /// type, e.g. `char s[] = "hi"`. Returns `None` if `self` was not an
    /// incomplete array or the element types disagree.
    pub(crate) fn complete_array_from(&self, source: &Type) -> Option<Type> {
        match (self, source) {
            (
                Type::Array(element, ArrayLength::Incomplete),
                Type::Array(from, ArrayLength::Fixed(len)),
            ) if element == from => Some(Type::array((**element).clone(), ArrayLength::Fixed(*len))),
            _ => None,
        }
    }
}

impl PartialEq for FunctionType {
    fn eq(&self, other: &Self) -> bool {
        // no prototype: any parameters are allowed, a holdover from C89
        if self.params.is_empty() || other.params.is_empty() {
            return self.return_type == other.return_type;
        }
        // don't require parameter names to match
        self.varargs == other.varargs
            && self.return_type == other.return_type
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(other.params.iter())
                .all(|(a, b)| a.ctype == b.ctype)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        print_type(self, None, f)
    }
}

impl fmt::Display for Qualifiers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match (self.c_const, self.volatile) {
                (true, true) => "const volatile",
                (true, false) => "const",
                (false, true) => "volatile",
                (false, false) => "",
            }
        )
    }
}

pub(crate) fn print_type(ctype: &Type, name: Option<InternedStr>, f: &mut Formatter) -> fmt::Result {
    print_pre(ctype, f)?;
    print_mid(ctype, name, f)?;
    print_post(ctype, f)
}

fn print_pre(ctype: &Type, f: &mut Formatter) -> fmt::Result {
    match ctype {
        Type::Void => write!(f, "void"),
        Type::Integer { size, signed } => {
            let base = match *size {
                arch::CHAR_SIZE => "char",
                arch::SHORT_SIZE => "short",
                arch::LONG_SIZE => "long",
                _ => "int",
            };
            write!(f, "{}{}", if *signed { "" } else { "unsigned " }, base)
        }
        Type::Real { size } => write!(
            f,
            "{}",
            if *size == arch::FLOAT_SIZE {
                "float"
            } else {
                "double"
            }
        ),
        Type::Pointer(inner, _) | Type::Array(inner, _) => print_pre(inner, f),
        Type::Function(func) => print_type(&func.return_type, None, f),
        Type::Object(ObjectType::Named(tag, _)) => write!(f, "struct {}", tag),
        Type::Object(ObjectType::Anonymous(_)) => write!(f, "<anonymous struct>"),
    }
}

fn print_mid(ctype: &Type, name: Option<InternedStr>, f: &mut Formatter) -> fmt::Result {
    match ctype {
        Type::Pointer(to, quals) => {
            let name = name.unwrap_or_default();
            // arrays and functions bind tighter than pointers, so a pointer
            // to either needs parentheses to hold the star inside
            let depth = matches!(&**to, Type::Array(_, _) | Type::Function(_));
            print_mid(to, None, f)?;

            write!(f, " ")?;
            if depth {
                write!(f, "(")?;
            }
            if *quals != Qualifiers::default() && name != InternedStr::default() {
                write!(f, "*{} {}", quals, name)?;
            } else {
                write!(f, "*{}{}", quals, name)?;
            }
            if depth {
                write!(f, ")")?;
            }
            Ok(())
        }
        Type::Array(to, _) => print_mid(to, name, f),
        _ => {
            if let Some(name) = name {
                write!(f, " {}", name)?;
            }
            Ok(())
        }
    }
}

fn print_post(ctype: &Type, f: &mut Formatter) -> fmt::Result {
    match ctype {
        Type::Pointer(to, _) => print_post(to, f),
        Type::Array(to, length) => {
            write!(f, "[")?;
            if let ArrayLength::Fixed(length) = length {
                write!(f, "{}", length)?;
            }
            write!(f, "]")?;
            print_post(to, f)
        }
        Type::Function(func) => {
            write!(f, "(")?;
            let mut params = func.params.iter();
            let print = |f: &mut Formatter<'_>, param: &Member| {
                let name = if param.name == InternedStr::default() {
                    None
                } else {
                    Some(param.name)
                };
                print_type(&param.ctype, name, f)
            };
            if let Some(first) = params.next() {
                print(f, first)?;
            }
            for param in params {
                write!(f, ", ")?;
                print(f, param)?;
            }
            if func.varargs {
                write!(f, ", ...")?;
            }
            write!(f, ")")
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::arch::{CHAR_SIZE, INT_SIZE, LONG_SIZE, PTR_SIZE, SHORT_SIZE};

    pub(crate) fn arb_type() -> impl Strategy<Value = Type> {
        let leaf = prop_oneof![
            Just(Type::Void),
            prop_oneof![Just(CHAR_SIZE), Just(SHORT_SIZE), Just(INT_SIZE), Just(LONG_SIZE)]
                .prop_flat_map(|size| any::<bool>()
                    .prop_map(move |signed| Type::Integer { size, signed })),
            Just(Type::real(4)),
            Just(Type::real(8)),
        ];

        leaf.prop_recursive(8, 64, 4, |inner| {
            prop_oneof![
                inner.clone().prop_map(Type::pointer),
                (inner, 1u64..16)
                    .prop_map(|(t, len)| Type::array(t, ArrayLength::Fixed(len))),
            ]
        })
    }

    fn object(fields: Vec<(&str, Type)>) -> Type {
        let fields = fields.into_iter().map(|(n, t)| (n.into(), t)).collect();
        Type::Object(ObjectType::Anonymous(std::rc::Rc::new(ObjectDef::layout(
            fields,
        ))))
    }

    #[test]
    fn scalar_sizes() {
        assert_eq!(Type::char().size(), 1);
        assert_eq!(Type::int().size(), 4);
        assert_eq!(Type::pointer(Type::char()).size(), PTR_SIZE);
        assert_eq!(Type::array(Type::int(), ArrayLength::Fixed(4)).size(), 16);
        assert_eq!(Type::array(Type::int(), ArrayLength::Incomplete).size(), 0);
        assert!(!Type::Void.is_complete());
    }

    #[test]
    fn char_then_int_layout() {
        // struct { char a; int b; }: b lands at 4, total size 8
        let s = object(vec![("a", Type::char()), ("b", Type::int())]);
        let def = s.object().unwrap();
        assert_eq!(def.members[0].offset, 0);
        assert_eq!(def.members[1].offset, 4);
        assert_eq!(s.size(), 8);
        assert_eq!(s.alignment(), 4);
    }

    #[test]
    fn tail_padding() {
        // struct { long a; char b; } pads out to 16
        let s = object(vec![("a", Type::integer(8)), ("b", Type::char())]);
        assert_eq!(s.size(), 16);
        // all-char structs get no padding at all
        let s = object(vec![("a", Type::char()), ("b", Type::char())]);
        assert_eq!(s.size(), 2);
        assert_eq!(s.alignment(), 1);
    }

    #[test]
    fn tag_identity() {
        let tag = TagRef::new();
        let a = Type::Object(ObjectType::Named("s".into(), tag));
        let b = a.clone();
        assert_eq!(a.size(), 0); // forward declaration, incomplete
        tag.update(ObjectDef::layout(vec![("x".into(), Type::int())]));
        // both copies see the completed body: the tag names one definition
        assert_eq!(a.size(), 4);
        assert_eq!(b.size(), 4);
        assert_eq!(a, b);
    }

    #[test]
    fn function_equality_ignores_param_names() {
        let f = |name: &str| {
            Type::Function(FunctionType {
                return_type: Box::new(Type::int()),
                params: vec![Member {
                    name: name.into(),
                    ctype: Type::int(),
                    offset: 0,
                }],
                varargs: false,
            })
        };
        assert_eq!(f("a"), f("b"));
    }

    #[test]
    fn array_completion() {
        let incomplete = Type::array(Type::int(), ArrayLength::Incomplete);
        let source = Type::array(Type::int(), ArrayLength::Fixed(3));
        assert_eq!(incomplete.complete_array_from(&source), Some(source.clone()));
        assert_eq!(source.complete_array_from(&source), None);
        let chars = Type::array(Type::char(), ArrayLength::Fixed(3));
        assert_eq!(incomplete.complete_array_from(&chars), None);
    }

    #[test]
    fn display() {
        assert_eq!(Type::int().to_string(), "int");
        assert_eq!(Type::unsigned(1).to_string(), "unsigned char");
        assert_eq!(Type::pointer(Type::int()).to_string(), "int *");
        assert_eq!(
            Type::array(Type::pointer(Type::char()), ArrayLength::Fixed(3)).to_string(),
            "char *[3]"
        );
    }

    proptest! {
        #[test]
        fn size_zero_iff_incomplete(t in arb_type()) {
            prop_assert_eq!(t.size() == 0, !t.is_complete());
        }
        #[test]
        fn alignment_divides_size(t in arb_type()) {
            prop_assume!(t.is_complete());
            prop_assert_eq!(t.size() % t.alignment(), 0);
        }
    }
}
