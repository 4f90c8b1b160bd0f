//! The three-address IL data model.
//!
//! A program is a set of named functions; a function body is a flat
//! sequence of labels and instructions.  Programs are interchanged as JSON
//! (`{"functions": [{"name": ..., "instrs": [...]}]}`); parsing goes
//! through a permissive raw mirror so malformed items are reported with a
//! specific diagnostic instead of a generic "no variant matched".

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::fmt;
use std::str::FromStr;

use derive_more::Display;
use num_bigint::BigInt;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::commons::Valid;
use crate::error::{Error, Result};

pub type Var = String;
pub type Label = String;
pub type FuncId = String;

// SECTION: types and literals

/// A value type.  Pointer types carry their pointee; a bare `"ptr"`
/// descriptor denotes an opaque pointer compatible with any pointee.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Type {
    Int,
    Bool,
    Ptr(Option<Box<Type>>),
}

impl Type {
    pub fn ptr(pointee: Type) -> Type {
        Type::Ptr(Some(Box::new(pointee)))
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(Some(t)) => Some(t),
            _ => None,
        }
    }

    /// Structural compatibility, with opaque pointers matching any pointer.
    pub fn compatible(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Int, Type::Int) | (Type::Bool, Type::Bool) => true,
            (Type::Ptr(None), Type::Ptr(_)) | (Type::Ptr(_), Type::Ptr(None)) => true,
            (Type::Ptr(Some(a)), Type::Ptr(Some(b))) => a.compatible(b),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::Ptr(None) => write!(f, "ptr"),
            Type::Ptr(Some(t)) => write!(f, "ptr<{t}>"),
        }
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Type::Int => s.serialize_str("int"),
            Type::Bool => s.serialize_str("bool"),
            Type::Ptr(None) => s.serialize_str("ptr"),
            Type::Ptr(Some(t)) => {
                let mut m = s.serialize_map(Some(1))?;
                m.serialize_entry("ptr", t)?;
                m.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        struct TypeVisitor;

        impl<'de> Visitor<'de> for TypeVisitor {
            type Value = Type;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "\"int\", \"bool\", \"ptr\", or {{\"ptr\": <type>}}")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Type, E> {
                match v {
                    "int" => Ok(Type::Int),
                    "bool" => Ok(Type::Bool),
                    "ptr" => Ok(Type::Ptr(None)),
                    other => Err(E::custom(format!("unknown type `{other}`"))),
                }
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Type, A::Error> {
                let Some((key, pointee)) = map.next_entry::<String, Type>()? else {
                    return Err(serde::de::Error::custom("empty type descriptor"));
                };
                if key != "ptr" {
                    return Err(serde::de::Error::custom(format!(
                        "unknown type constructor `{key}`"
                    )));
                }
                Ok(Type::ptr(pointee))
            }
        }

        d.deserialize_any(TypeVisitor)
    }
}

/// A literal carried by a `const` instruction.  Integers are
/// arbitrary-precision and survive the JSON round trip untruncated.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Literal {
    Int(BigInt),
    Bool(bool),
}

impl Literal {
    fn from_json(v: &serde_json::Value) -> Result<Literal> {
        match v {
            serde_json::Value::Bool(b) => Ok(Literal::Bool(*b)),
            serde_json::Value::Number(n) => n
                .to_string()
                .parse::<BigInt>()
                .map(Literal::Int)
                .map_err(|_| Error::Malformed(format!("`const` value `{n}` is not an integer"))),
            other => Err(Error::Malformed(format!(
                "`const` value must be an integer or boolean, got {other}"
            ))),
        }
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        match self {
            Literal::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Literal::Int(i) => serde_json::Number::from_str(&i.to_string())
                .map(serde_json::Value::Number)
                .map_err(|e| Error::Malformed(format!("unrepresentable literal: {e}"))),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Bool(b) => write!(f, "{b}"),
        }
    }
}

// SECTION: opcodes

/// Opcodes that produce a value into a destination.
#[derive(Display, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueOp {
    #[display(fmt = "add")]
    Add,
    #[display(fmt = "sub")]
    Sub,
    #[display(fmt = "mul")]
    Mul,
    #[display(fmt = "div")]
    Div,
    #[display(fmt = "eq")]
    Eq,
    #[display(fmt = "lt")]
    Lt,
    #[display(fmt = "le")]
    Le,
    #[display(fmt = "gt")]
    Gt,
    #[display(fmt = "ge")]
    Ge,
    #[display(fmt = "not")]
    Not,
    #[display(fmt = "and")]
    And,
    #[display(fmt = "or")]
    Or,
    #[display(fmt = "id")]
    Id,
    #[display(fmt = "load")]
    Load,
    #[display(fmt = "alloc")]
    Alloc,
    #[display(fmt = "ptradd")]
    PtrAdd,
    #[display(fmt = "ptreq")]
    PtrEq,
    #[display(fmt = "ptrlt")]
    PtrLt,
    #[display(fmt = "ptrle")]
    PtrLe,
    #[display(fmt = "ptrgt")]
    PtrGt,
    #[display(fmt = "ptrge")]
    PtrGe,
}

impl ValueOp {
    pub fn arity(self) -> usize {
        use ValueOp::*;
        match self {
            Not | Id | Load | Alloc => 1,
            _ => 2,
        }
    }
}

impl FromStr for ValueOp {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        use ValueOp::*;
        Ok(match s {
            "add" => Add,
            "sub" => Sub,
            "mul" => Mul,
            "div" => Div,
            "eq" => Eq,
            "lt" => Lt,
            "le" => Le,
            "gt" => Gt,
            "ge" => Ge,
            "not" => Not,
            "and" => And,
            "or" => Or,
            "id" => Id,
            "load" => Load,
            "alloc" => Alloc,
            "ptradd" => PtrAdd,
            "ptreq" => PtrEq,
            "ptrlt" => PtrLt,
            "ptrle" => PtrLe,
            "ptrgt" => PtrGt,
            "ptrge" => PtrGe,
            _ => return Err(()),
        })
    }
}

/// Opcodes executed for effect only.
#[derive(Display, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EffectOp {
    #[display(fmt = "br")]
    Br,
    #[display(fmt = "jmp")]
    Jmp,
    #[display(fmt = "ret")]
    Ret,
    #[display(fmt = "print")]
    Print,
    #[display(fmt = "store")]
    Store,
    #[display(fmt = "free")]
    Free,
    #[display(fmt = "nop")]
    Nop,
}

impl EffectOp {
    /// `None` means variadic.
    pub fn arity(self) -> Option<usize> {
        use EffectOp::*;
        match self {
            Br => Some(3),
            Jmp => Some(1),
            Ret | Nop => Some(0),
            Store => Some(2),
            Free => Some(1),
            Print => None,
        }
    }
}

impl FromStr for EffectOp {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        use EffectOp::*;
        Ok(match s {
            "br" => Br,
            "jmp" => Jmp,
            "ret" => Ret,
            "print" => Print,
            "store" => Store,
            "free" => Free,
            "nop" => Nop,
            _ => return Err(()),
        })
    }
}

// SECTION: instructions, items, functions, programs

/// A tagged instruction.  Constants and value operations carry a
/// destination and a type; effect operations carry neither.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Instruction {
    Constant {
        dest: Var,
        typ: Type,
        value: Literal,
    },
    Value {
        op: ValueOp,
        dest: Var,
        typ: Type,
        args: Vec<Var>,
    },
    Effect {
        op: EffectOp,
        args: Vec<Var>,
    },
}

impl Instruction {
    pub fn constant(dest: &str, typ: Type, value: Literal) -> Instruction {
        Instruction::Constant {
            dest: dest.to_owned(),
            typ,
            value,
        }
    }

    pub fn value(op: ValueOp, dest: &str, typ: Type, args: &[&str]) -> Instruction {
        Instruction::Value {
            op,
            dest: dest.to_owned(),
            typ,
            args: args.iter().map(|a| (*a).to_owned()).collect(),
        }
    }

    pub fn effect(op: EffectOp, args: &[&str]) -> Instruction {
        Instruction::Effect {
            op,
            args: args.iter().map(|a| (*a).to_owned()).collect(),
        }
    }

    /// The destination, for constants and value operations.
    pub fn dest(&self) -> Option<&Var> {
        match self {
            Instruction::Constant { dest, .. } | Instruction::Value { dest, .. } => Some(dest),
            Instruction::Effect { .. } => None,
        }
    }

    pub fn typ(&self) -> Option<&Type> {
        match self {
            Instruction::Constant { typ, .. } | Instruction::Value { typ, .. } => Some(typ),
            Instruction::Effect { .. } => None,
        }
    }

    pub fn args(&self) -> &[Var] {
        match self {
            Instruction::Constant { .. } => &[],
            Instruction::Value { args, .. } | Instruction::Effect { args, .. } => args,
        }
    }

    /// Whether this instruction writes a destination.
    pub fn is_value_like(&self) -> bool {
        self.dest().is_some()
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Effect {
                op: EffectOp::Br | EffectOp::Jmp | EffectOp::Ret,
                ..
            }
        )
    }

    /// The variables this instruction reads.  `br` reads its condition
    /// only; `jmp` and `ret` read nothing.
    pub fn read_vars(&self) -> Vec<&Var> {
        match self {
            Instruction::Constant { .. } => vec![],
            Instruction::Value { args, .. } => args.iter().collect(),
            Instruction::Effect { op, args } => match op {
                EffectOp::Br => args.iter().take(1).collect(),
                EffectOp::Jmp | EffectOp::Ret | EffectOp::Nop => vec![],
                EffectOp::Print | EffectOp::Store | EffectOp::Free => args.iter().collect(),
            },
        }
    }

    fn check_arity(&self) -> Result<()> {
        let (op, expected, got) = match self {
            Instruction::Constant { .. } => return Ok(()),
            Instruction::Value { op, args, .. } => (op.to_string(), op.arity(), args.len()),
            Instruction::Effect { op, args } => match op.arity() {
                Some(n) => (op.to_string(), n, args.len()),
                None => return Ok(()),
            },
        };
        if expected != got {
            return Err(Error::WrongArgCount { op, expected, got });
        }
        Ok(())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Constant { dest, typ, value } => {
                write!(f, "{dest}: {typ} = const {value}")
            }
            Instruction::Value { op, dest, typ, args } => {
                write!(f, "{dest}: {typ} = {op}")?;
                for a in args {
                    write!(f, " {a}")?;
                }
                Ok(())
            }
            Instruction::Effect { op, args } => {
                write!(f, "{op}")?;
                for a in args {
                    write!(f, " {a}")?;
                }
                Ok(())
            }
        }
    }
}

/// One element of a function body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    Label(Label),
    Code(Instruction),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    pub name: FuncId,
    pub items: Vec<Item>,
}

/// A whole program: a mapping from function names to functions, one of
/// which must be `main`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub functions: Map<FuncId, Function>,
}

impl Program {
    pub fn from_json_str(s: &str) -> Result<Program> {
        let raw: RawProgram = serde_json::from_str(s)?;
        let mut functions = Map::new();
        for rf in raw.functions {
            let f = Function {
                name: rf.name.clone(),
                items: rf
                    .instrs
                    .iter()
                    .map(item_from_raw)
                    .collect::<Result<Vec<_>>>()?,
            };
            if functions.insert(rf.name.clone(), f).is_some() {
                return Err(Error::Malformed(format!("duplicate function `{}`", rf.name)));
            }
        }
        Ok(Program { functions })
    }

    pub fn to_json_string(&self) -> Result<String> {
        let raw = RawProgram {
            functions: self
                .functions
                .values()
                .map(|f| {
                    Ok(RawFunction {
                        name: f.name.clone(),
                        instrs: f.items.iter().map(raw_from_item).collect::<Result<_>>()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };
        Ok(serde_json::to_string_pretty(&raw)?)
    }

    /// Check the program for malformed IR: a `main` function, per-function
    /// unique labels, resolvable branch targets, and opcode arities.
    pub fn validate(self) -> Result<Valid<Program>> {
        if !self.functions.contains_key("main") {
            return Err(Error::MissingMain);
        }
        for f in self.functions.values() {
            let mut labels: Set<&Label> = Set::new();
            for item in &f.items {
                if let Item::Label(l) = item {
                    if !labels.insert(l) {
                        return Err(Error::DuplicateLabel(l.clone()));
                    }
                }
            }
            for item in &f.items {
                let Item::Code(inst) = item else { continue };
                inst.check_arity()?;
                if let Instruction::Effect { op, args } = inst {
                    let targets: &[Var] = match op {
                        EffectOp::Jmp => &args[..],
                        EffectOp::Br => &args[1..],
                        _ => &[],
                    };
                    for t in targets {
                        if !labels.contains(t) {
                            return Err(Error::UnknownLabel(t.clone()));
                        }
                    }
                }
            }
        }
        Ok(Valid(self))
    }
}

// SECTION: raw JSON mirror

#[derive(Serialize, Deserialize)]
struct RawProgram {
    functions: Vec<RawFunction>,
}

#[derive(Serialize, Deserialize)]
struct RawFunction {
    name: String,
    instrs: Vec<RawItem>,
}

#[derive(Serialize, Deserialize)]
struct RawItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dest: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    typ: Option<Type>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
}

fn item_from_raw(raw: &RawItem) -> Result<Item> {
    if let Some(label) = &raw.label {
        return Ok(Item::Label(label.clone()));
    }
    let Some(op) = &raw.op else {
        return Err(Error::Malformed(
            "item carries neither `label` nor `op`".to_owned(),
        ));
    };

    let dest = |raw: &RawItem| {
        raw.dest
            .clone()
            .ok_or_else(|| Error::Malformed(format!("`{op}` is missing `dest`")))
    };
    let typ = |raw: &RawItem| {
        raw.typ
            .clone()
            .ok_or_else(|| Error::Malformed(format!("`{op}` is missing `type`")))
    };

    let inst = if op == "const" {
        let value = raw
            .value
            .as_ref()
            .ok_or_else(|| Error::Malformed("`const` is missing `value`".to_owned()))?;
        Instruction::Constant {
            dest: dest(raw)?,
            typ: typ(raw)?,
            value: Literal::from_json(value)?,
        }
    } else if let Ok(vop) = op.parse::<ValueOp>() {
        Instruction::Value {
            op: vop,
            dest: dest(raw)?,
            typ: typ(raw)?,
            args: raw.args.clone(),
        }
    } else if let Ok(eop) = op.parse::<EffectOp>() {
        Instruction::Effect {
            op: eop,
            args: raw.args.clone(),
        }
    } else {
        return Err(Error::UnknownOpcode(op.clone()));
    };

    inst.check_arity()?;
    Ok(Item::Code(inst))
}

fn raw_from_item(item: &Item) -> Result<RawItem> {
    let empty = RawItem {
        label: None,
        op: None,
        dest: None,
        typ: None,
        args: vec![],
        value: None,
    };
    Ok(match item {
        Item::Label(l) => RawItem {
            label: Some(l.clone()),
            ..empty
        },
        Item::Code(Instruction::Constant { dest, typ, value }) => RawItem {
            op: Some("const".to_owned()),
            dest: Some(dest.clone()),
            typ: Some(typ.clone()),
            value: Some(value.to_json()?),
            ..empty
        },
        Item::Code(Instruction::Value { op, dest, typ, args }) => RawItem {
            op: Some(op.to_string()),
            dest: Some(dest.clone()),
            typ: Some(typ.clone()),
            args: args.clone(),
            ..empty
        },
        Item::Code(Instruction::Effect { op, args }) => RawItem {
            op: Some(op.to_string()),
            args: args.clone(),
            ..empty
        },
    })
}
