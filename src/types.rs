/* Reference keys identify a field or method independently of the site that refers to it. */
/* Type names are kept in dex descriptor form e.g. Ljava/lang/Object; */

use bitflags::bitflags;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_until, take_while1};
use nom::character::complete::{char, one_of};
use nom::combinator::{all_consuming, recognize};
use nom::multi::{many0, many0_count};
use nom::sequence::{delimited, pair, terminated, tuple};
use nom::{IResult, Parser};
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Access flags shared by classes, fields and methods (`access_flags` in dex).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const BRIDGE = 0x40;
        const TRANSIENT = 0x80;
        const VARARGS = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

/// Identifies a field by declaring class, name and type descriptor.
///
/// # Examples
///
/// ```
/// use dexlink::types::FieldKey;
///
/// let key = FieldKey::parse("Lcom/basic/Foo;->count:I").unwrap();
/// assert_eq!(key.defining_class, "Lcom/basic/Foo;");
/// assert_eq!(key.to_string(), "Lcom/basic/Foo;->count:I");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    pub defining_class: String,
    pub name: String,
    pub field_type: String,
}

impl FieldKey {
    pub fn new(
        defining_class: impl Into<String>,
        name: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        FieldKey {
            defining_class: defining_class.into(),
            name: name.into(),
            field_type: field_type.into(),
        }
    }

    /// Parse the smali `Lclass;->name:Type` form.
    pub fn parse(s: &str) -> Option<FieldKey> {
        let parsed: IResult<&str, (&str, &str, &str)> = all_consuming(tuple((
            terminated(parse_type_descriptor, tag("->")),
            terminated(take_until(":"), char(':')),
            parse_type_descriptor,
        )))
        .parse(s);
        let (_, (class, name, field_type)) = parsed.ok()?;
        Some(FieldKey::new(class, name, field_type))
    }

    /// True when both keys name the same member, ignoring the declaring class.
    pub fn same_member(&self, other: &FieldKey) -> bool {
        self.name == other.name && self.field_type == other.field_type
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}->{}:{}", self.defining_class, self.name, self.field_type)
    }
}

/// Identifies a method by declaring class, name and prototype descriptor,
/// e.g. `(ILjava/lang/String;)V`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodKey {
    pub defining_class: String,
    pub name: String,
    pub prototype: String,
}

impl MethodKey {
    pub fn new(
        defining_class: impl Into<String>,
        name: impl Into<String>,
        prototype: impl Into<String>,
    ) -> Self {
        MethodKey {
            defining_class: defining_class.into(),
            name: name.into(),
            prototype: prototype.into(),
        }
    }

    /// Parse the smali `Lclass;->name(Args)Ret` form.
    pub fn parse(s: &str) -> Option<MethodKey> {
        let parsed: IResult<&str, (&str, &str, &str)> = all_consuming(tuple((
            terminated(parse_type_descriptor, tag("->")),
            take_until("("),
            recognize(parse_prototype),
        )))
        .parse(s);
        let (_, (class, name, prototype)) = parsed.ok()?;
        Some(MethodKey::new(class, name, prototype))
    }

    pub fn same_member(&self, other: &MethodKey) -> bool {
        self.name == other.name && self.prototype == other.prototype
    }

    pub fn parameter_types(&self) -> Vec<&str> {
        parse_prototype(&self.prototype)
            .map(|(_, (params, _))| params)
            .unwrap_or_default()
    }

    pub fn return_type(&self) -> Option<&str> {
        parse_prototype(&self.prototype).ok().map(|(_, (_, ret))| ret)
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}->{}{}", self.defining_class, self.name, self.prototype)
    }
}

/// Recognise one type descriptor: a primitive, `Lpkg/Name;` or any array of those.
pub(crate) fn parse_type_descriptor(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        many0_count(char('[')),
        alt((
            recognize(delimited(char('L'), take_while1(|c| c != ';'), char(';'))),
            recognize(one_of("ZBCSIJFDV")),
        )),
    ))
    .parse(input)
}

/// Split a prototype descriptor into parameter descriptors and the return descriptor.
pub(crate) fn parse_prototype(input: &str) -> IResult<&str, (Vec<&str>, &str)> {
    pair(
        delimited(char('('), many0(parse_type_descriptor), char(')')),
        parse_type_descriptor,
    )
    .parse(input)
}

/// Build a prototype descriptor from its parts.
pub fn prototype_descriptor<S: AsRef<str>>(parameters: &[S], return_type: &str) -> String {
    let mut s = String::from("(");
    for p in parameters {
        s.push_str(p.as_ref());
    }
    s.push(')');
    s.push_str(return_type);
    s
}
