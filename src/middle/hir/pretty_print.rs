use std::fmt::Write;

use colored::Colorize;
use itertools::Itertools;

use super::{
    BasicBlock, FunctionIR, ImportKind, Instruction, InstructionKind, LiteralValue, ModuleIR,
    ObjectKey, ObjectPatternProperty, ObjectProperty, Place, Terminal,
};

pub fn pretty_print_module(module: &ModuleIR) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} {}",
        "module".magenta(),
        module.path.display().to_string().blue()
    );

    for function in module.functions.values() {
        out.push_str(&pretty_print_function(function));
    }

    out
}

pub fn pretty_print_function(function: &FunctionIR) -> String {
    let mut out = String::new();

    let name = function
        .name
        .map(|name| name.value().to_string())
        .unwrap_or_else(|| format!("{:?}", function.kind).to_lowercase());

    let _ = writeln!(
        out,
        "{} {}{}{}{}",
        function.id.to_string().magenta(),
        name.blue(),
        "(".white(),
        function.params.iter().join(", "),
        ") {".white()
    );

    for instruction in &function.header {
        let _ = writeln!(out, "  {} {instruction}", "header".dimmed());
    }

    for block in function.blocks.values() {
        write_block(&mut out, function, block);
    }

    let _ = writeln!(out, "{}", "}".white());
    out
}

fn write_block(out: &mut String, function: &FunctionIR, block: &BasicBlock) {
    let predecessors = function.cfg.predecessors(block.id).join(", ");
    let _ = writeln!(
        out,
        "{} {}",
        format!("{}:", block.id).bright_red(),
        format!("; preds: {predecessors}").dimmed()
    );

    for phi in function.phis.iter().filter(|phi| phi.block == block.id) {
        let _ = writeln!(
            out,
            "    {} {} {}{}{}",
            phi.place,
            "=".white(),
            "phi".bright_green(),
            "(".white(),
            phi.operands
                .iter()
                .map(|(block, place)| format!("{} -> {place}", block.to_string().blue()))
                .join(", ")
        );
    }

    for instruction in &block.instructions {
        let _ = writeln!(out, "    {instruction}");
    }

    match &block.terminal {
        Some(terminal) => {
            let _ = writeln!(out, "    {terminal}");
        }
        None => {
            let _ = writeln!(out, "    {}", "<unterminated>".red());
        }
    }
}

impl core::fmt::Display for Place {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = format!(
            "{}{}.{}",
            self.identifier.id, self.identifier.declaration, self.identifier.version
        );
        write!(f, "{}", text.yellow())
    }
}

impl core::fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiteralValue::Number(value) => write!(f, "{value}"),
            LiteralValue::String(value) => write!(f, "{value:?}"),
            LiteralValue::Boolean(value) => write!(f, "{value}"),
            LiteralValue::Null => f.write_str("null"),
            LiteralValue::Undefined => f.write_str("undefined"),
        }
    }
}

impl core::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKey::Identifier(name) => write!(f, "{}", name.value()),
            ObjectKey::String(value) => write!(f, "{value:?}"),
            ObjectKey::Number(value) => write!(f, "{value}"),
            ObjectKey::Computed(place) => write!(f, "[{place}]"),
        }
    }
}

fn list(places: &[Place]) -> String {
    places.iter().join(", ")
}

impl core::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} ",
            self.id.to_string().dimmed(),
            self.place,
            "=".white()
        )?;

        let op = |name: &str| name.cyan();

        match &self.kind {
            InstructionKind::LoadLocal { place } => write!(f, "{} {place}", op("load_local")),
            InstructionKind::StoreLocal { lval, value, kind } => write!(
                f,
                "{} {} {lval} {} {value}",
                op("store_local"),
                format!("{kind:?}").to_lowercase().purple(),
                "<-".white()
            ),
            InstructionKind::LoadGlobal { name } => {
                write!(f, "{} {}", op("load_global"), name.value().blue())
            }
            InstructionKind::StoreGlobal { name, value } => write!(
                f,
                "{} {} {} {value}",
                op("store_global"),
                name.value().blue(),
                "<-".white()
            ),
            InstructionKind::PropertyLoad { object, property } => {
                write!(f, "{} {object}.{}", op("property_load"), property.value())
            }
            InstructionKind::PropertyStore {
                object,
                property,
                value,
            } => write!(
                f,
                "{} {object}.{} {} {value}",
                op("property_store"),
                property.value(),
                "<-".white()
            ),
            InstructionKind::ComputedLoad { object, property } => {
                write!(f, "{} {object}[{property}]", op("computed_load"))
            }
            InstructionKind::ComputedStore {
                object,
                property,
                value,
            } => write!(
                f,
                "{} {object}[{property}] {} {value}",
                op("computed_store"),
                "<-".white()
            ),
            InstructionKind::Copy { lval, value } => {
                write!(f, "{} {lval} {} {value}", op("copy"), "<-".white())
            }
            InstructionKind::Literal { value } => {
                write!(f, "{} {}", op("literal"), value.to_string().purple())
            }
            InstructionKind::Binary {
                operator,
                left,
                right,
            } => write!(f, "{} {left} {} {right}", op("binary"), operator.as_ref()),
            InstructionKind::Unary { operator, argument } => {
                write!(f, "{} {}{argument}", op("unary"), operator.as_ref())
            }
            InstructionKind::Logical {
                operator,
                left,
                right,
            } => write!(f, "{} {left} {} {right}", op("logical"), operator.as_ref()),
            InstructionKind::Conditional {
                test,
                consequent,
                alternate,
            } => write!(
                f,
                "{} {test} ? {consequent} : {alternate}",
                op("conditional")
            ),
            InstructionKind::Call { callee, arguments } => {
                write!(f, "{} {callee}({})", op("call"), list(arguments))
            }
            InstructionKind::New { callee, arguments } => {
                write!(f, "{} {callee}({})", op("new"), list(arguments))
            }
            InstructionKind::Array { elements } => {
                write!(f, "{} [{}]", op("array"), list(elements))
            }
            InstructionKind::Object { properties } => {
                let properties = properties
                    .iter()
                    .map(|property| match property {
                        ObjectProperty::KeyValue { key, value, .. } => format!("{key}: {value}"),
                        ObjectProperty::Method { key, function } => format!("{key}: {function}"),
                        ObjectProperty::Spread(place) => format!("...{place}"),
                    })
                    .join(", ");
                write!(f, "{} {{{properties}}}", op("object"))
            }
            InstructionKind::FunctionExpression { function } => {
                write!(f, "{} {}", op("function"), function.to_string().magenta())
            }
            InstructionKind::BindingIdentifier { name } => {
                write!(f, "{} {}", op("binding"), name.value().blue())
            }
            InstructionKind::ArrayPattern { elements } => {
                let elements = elements
                    .iter()
                    .map(|element| element.map(|place| place.to_string()).unwrap_or_default())
                    .join(", ");
                write!(f, "{} [{elements}]", op("array_pattern"))
            }
            InstructionKind::ObjectPattern { properties } => {
                let properties = properties
                    .iter()
                    .map(|property| match property {
                        ObjectPatternProperty::KeyValue { key, value } => format!("{key}: {value}"),
                        ObjectPatternProperty::Rest(place) => format!("...{place}"),
                    })
                    .join(", ");
                write!(f, "{} {{{properties}}}", op("object_pattern"))
            }
            InstructionKind::AssignmentPattern { target, default } => {
                write!(f, "{} {target} = {default}", op("assignment_pattern"))
            }
            InstructionKind::Spread { argument } => write!(f, "{} {argument}", op("spread")),
            InstructionKind::Rest { argument } => write!(f, "{} {argument}", op("rest")),
            InstructionKind::Destructure {
                pattern,
                value,
                kind,
            } => write!(
                f,
                "{} {} {pattern} {} {value}",
                op("destructure"),
                format!("{kind:?}").to_lowercase().purple(),
                "<-".white()
            ),
            InstructionKind::FunctionDeclaration { function } => write!(
                f,
                "{} {}",
                op("function_declaration"),
                function.to_string().magenta()
            ),
            InstructionKind::ImportDeclaration { source, specifiers } => write!(
                f,
                "{} {{{}}} from {source:?}",
                op("import"),
                list(specifiers)
            ),
            InstructionKind::ImportSpecifier { kind, local } => {
                let imported = match kind {
                    ImportKind::Default => "default".to_string(),
                    ImportKind::Named(name) => name.value().to_string(),
                    ImportKind::Namespace => "*".to_string(),
                };
                write!(
                    f,
                    "{} {imported} as {}",
                    op("import_specifier"),
                    local.value().blue()
                )
            }
            InstructionKind::ExportSpecifier { local, exported } => write!(
                f,
                "{} {local} as {}",
                op("export_specifier"),
                exported.value().blue()
            ),
            InstructionKind::ExportNamedDeclaration { specifiers } => {
                write!(f, "{} {{{}}}", op("export"), list(specifiers))
            }
            InstructionKind::ExportDefaultDeclaration { value } => {
                write!(f, "{} {value}", op("export_default"))
            }
            InstructionKind::ExpressionStatement { expression } => {
                write!(f, "{} {expression}", op("expression_statement"))
            }
            InstructionKind::Unsupported { node, bindings } => write!(
                f,
                "{} {} [{}]",
                op("unsupported").red(),
                node.name(),
                bindings
                    .iter()
                    .map(|(name, place)| format!("{}: {place}", name.value()))
                    .join(", ")
            ),
        }
    }
}

impl core::fmt::Display for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Terminal::Jump { target } => {
                write!(f, "{} {}", "jmp".cyan(), target.to_string().blue())
            }
            Terminal::Branch {
                test,
                consequent,
                alternate,
                fallthrough,
            } => write!(
                f,
                "{} {test} {} {} {} {}",
                "br".cyan(),
                consequent.to_string().blue(),
                alternate.to_string().blue(),
                "fallthrough".dimmed(),
                fallthrough.to_string().blue()
            ),
            Terminal::Return { value: Some(value) } => write!(f, "{} {value}", "ret".cyan()),
            Terminal::Return { value: None } => write!(f, "{}", "ret".cyan()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::hir::{
        BlockId, DeclarationId, Identifier, IdentifierId, InstructionId, PlaceId, Version,
    };

    fn place(n: u32) -> Place {
        Place {
            id: PlaceId(n),
            identifier: Identifier {
                id: IdentifierId(n),
                version: Version::Numbered(0),
                declaration: DeclarationId(n),
            },
        }
    }

    #[test]
    fn instructions_print_their_operands() {
        let instruction = Instruction {
            id: InstructionId(4),
            place: place(2),
            origin: None,
            kind: InstructionKind::Array {
                elements: vec![place(0), place(1)],
            },
        };

        assert_eq!(
            strip_ansi_escapes::strip_str(instruction.to_string()),
            "i4 $2d2.0 = array [$0d0.0, $1d1.0]"
        );
        assert_eq!(
            strip_ansi_escapes::strip_str(Terminal::Jump { target: BlockId(3) }.to_string()),
            "jmp bb3"
        );
    }
}
