use tracing::debug;
use wasm_encoder::ValType;

use crate::ast::{Ast, ExprId};
use crate::codegen_wasm::CodeGen;
use crate::context::TargetContext;
use crate::error::CoreError;
use crate::runtime::Builtin;
use crate::typecheck::{TypeEnv, infer_types};
use crate::types::Type;
use crate::unit::CodeUnit;

#[derive(Debug, PartialEq, Eq)]
pub struct CompilationArtifact {
    pub wasm: Vec<u8>,
    /// Type of the compiled expression, which is also the entry's result.
    pub ty: Type,
    /// Runtime functions imported by the module, in index order.
    pub runtime_symbols: Vec<String>,
}

/// Compile one expression into a module exporting `context.entry_name`.
///
/// Variables in `env` become the entry's parameters, in declaration
/// order. Functions in `env` are imported from `context.host_module`;
/// one may not share the entry's name or a runtime import's module and name.
pub fn compile_expression(
    ast: &Ast,
    root: ExprId,
    env: &TypeEnv,
    context: &TargetContext,
) -> Result<CompilationArtifact, CoreError> {
    debug!(entry = %context.entry_name, nodes = ast.len(), "compiling expression");
    ast.bind_tree(root);
    let ty = infer_types(ast, root, env)?;

    let mut unit = CodeUnit::new(context.entry_name.clone(), context);
    let runtime = Builtin::initialize(&mut unit, context)?;

    let functions = env.functions();
    let mut user_functions = Vec::with_capacity(functions.len());
    for (name, signature) in &functions {
        if *name == context.entry_name || unit.get_import(&context.host_module, name).is_some() {
            return Err(CoreError::NameClash(name.to_string()));
        }
        let params = value_types(context, signature.params.iter().copied(), name)?;
        let signature = context.signature(params, context.value_type(signature.result));
        let func = unit.declare_function(&context.host_module, name, signature)?;
        user_functions.push((*name, func));
    }

    let variables = env.variables();
    let params = value_types(context, variables.iter().map(|(_, ty)| *ty), &context.entry_name)?;
    let entry = unit.define_function(
        &context.entry_name,
        context.signature(params, context.value_type(ty)),
        true,
    )?;

    let mut codegen = CodeGen::new(&mut unit, &runtime, context, &variables)?;
    for (name, func) in user_functions {
        codegen.bind_function(name, func);
    }
    codegen.emit(ast, root)?;
    let body = codegen.finish();
    unit.set_body(entry, body);

    let runtime_symbols = unit
        .import_names(&context.runtime_module)
        .into_iter()
        .map(str::to_string)
        .collect();
    let wasm = unit.finish()?;
    debug!(bytes = wasm.len(), %ty, "compiled expression");

    Ok(CompilationArtifact {
        wasm,
        ty,
        runtime_symbols,
    })
}

fn value_types(
    context: &TargetContext,
    types: impl Iterator<Item = Type>,
    owner: &str,
) -> Result<Vec<ValType>, CoreError> {
    types
        .map(|ty| {
            context.value_type(ty).ok_or_else(|| CoreError::TypeMismatch {
                context: format!("parameter of '{owner}'"),
                expected: "a value type".to_string(),
                found: ty,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;
    use crate::typecheck::FunctionSignature;
    use pretty_assertions::assert_eq;
    use wasmi::{Caller, Engine, Extern, Linker, Module, Store, Val};

    enum Object {
        Text(String),
        List(Vec<i64>),
    }

    /// A minimal in-test implementation of the `quill_rt` runtime.
    #[derive(Default)]
    struct Host {
        objects: Vec<Object>,
        output: String,
    }

    impl Host {
        fn alloc(&mut self, object: Object) -> i64 {
            self.objects.push(object);
            self.objects.len() as i64
        }

        fn object(&mut self, handle: &Val) -> Result<&mut Object, wasmi::Error> {
            let index = (int(handle) - 1) as usize;
            self.objects
                .get_mut(index)
                .ok_or_else(|| wasmi::Error::new("invalid handle"))
        }

        fn text(&mut self, handle: &Val) -> Result<String, wasmi::Error> {
            match self.object(handle)? {
                Object::Text(text) => Ok(text.clone()),
                Object::List(_) => Err(wasmi::Error::new("expected a string")),
            }
        }

        fn list(&mut self, handle: &Val) -> Result<&mut Vec<i64>, wasmi::Error> {
            match self.object(handle)? {
                Object::List(list) => Ok(list),
                Object::Text(_) => Err(wasmi::Error::new("expected an array")),
            }
        }
    }

    fn int(value: &Val) -> i64 {
        match value {
            Val::I64(value) => *value,
            Val::I32(value) => i64::from(*value),
            _ => 0,
        }
    }

    fn read(caller: &Caller<'_, Host>, ptr: &Val, len: usize) -> Result<Vec<u8>, wasmi::Error> {
        let mut buffer = vec![0; len];
        if len == 0 {
            return Ok(buffer);
        }
        let memory = caller
            .get_export("memory")
            .and_then(Extern::into_memory)
            .ok_or_else(|| wasmi::Error::new("module exports no memory"))?;
        memory
            .read(caller, int(ptr) as usize, &mut buffer)
            .map_err(|err| wasmi::Error::new(err.to_string()))?;
        Ok(buffer)
    }

    fn dispatch(
        mut caller: Caller<'_, Host>,
        name: &str,
        params: &[Val],
        results: &mut [Val],
    ) -> Result<(), wasmi::Error> {
        let value = match name {
            "exit_if_error" => {
                if int(&params[0]) != 0 {
                    return Err(wasmi::Error::i32_exit(1));
                }
                None
            }
            "string_create" => {
                let bytes = read(&caller, &params[0], int(&params[1]) as usize)?;
                let text =
                    String::from_utf8(bytes).map_err(|err| wasmi::Error::new(err.to_string()))?;
                Some(caller.data_mut().alloc(Object::Text(text)))
            }
            "string_get_size" => Some(caller.data_mut().text(&params[0])?.len() as i64),
            "string_concat" => {
                let host = caller.data_mut();
                let joined = host.text(&params[0])? + &host.text(&params[1])?;
                Some(host.alloc(Object::Text(joined)))
            }
            "string_equals" => {
                let host = caller.data_mut();
                Some(i64::from(host.text(&params[0])? == host.text(&params[1])?))
            }
            "string_index_of" => {
                let host = caller.data_mut();
                let haystack = host.text(&params[0])?;
                let needle = host.text(&params[1])?;
                Some(haystack.find(&needle).map_or(-1, |at| at as i64))
            }
            "string_trim" | "string_trim_left" | "string_trim_right" => {
                let host = caller.data_mut();
                let text = host.text(&params[0])?;
                let trimmed = match name {
                    "string_trim_left" => text.trim_start(),
                    "string_trim_right" => text.trim_end(),
                    _ => text.trim(),
                };
                let trimmed = trimmed.to_string();
                Some(host.alloc(Object::Text(trimmed)))
            }
            "integer2string" => {
                let text = int(&params[0]).to_string();
                Some(caller.data_mut().alloc(Object::Text(text)))
            }
            "string2integer" => {
                let parsed = caller.data_mut().text(&params[0])?.parse::<i64>();
                results[0] = Val::I64(*parsed.as_ref().unwrap_or(&0));
                results[1] = Val::I32(i32::from(parsed.is_err()));
                return Ok(());
            }
            "print_integer" | "println_integer" => {
                let text = int(&params[0]).to_string();
                let host = caller.data_mut();
                host.output.push_str(&text);
                if name == "println_integer" {
                    host.output.push('\n');
                }
                None
            }
            "print_string" | "println_string" => {
                let host = caller.data_mut();
                let text = host.text(&params[0])?;
                host.output.push_str(&text);
                if name == "println_string" {
                    host.output.push('\n');
                }
                None
            }
            "array_get_size" => Some(caller.data_mut().list(&params[0])?.len() as i64),
            _ if name.starts_with("array_create_") && name.ends_with("_with_literal") => {
                let count = int(&params[0]) as usize;
                let width = if name.contains("integer") { 8 } else { 4 };
                let bytes = read(&caller, &params[1], count * width)?;
                let items = bytes
                    .chunks(width)
                    .map(|chunk| match chunk {
                        [a, b, c, d, e, f, g, h] => i64::from_le_bytes([*a, *b, *c, *d, *e, *f, *g, *h]),
                        [a, b, c, d] => i64::from(i32::from_le_bytes([*a, *b, *c, *d])),
                        _ => 0,
                    })
                    .collect();
                Some(caller.data_mut().alloc(Object::List(items)))
            }
            _ if name.starts_with("array_create_") => {
                Some(caller.data_mut().alloc(Object::List(Vec::new())))
            }
            _ if name.starts_with("array_push_") => {
                caller.data_mut().list(&params[0])?.push(int(&params[1]));
                None
            }
            _ if name.starts_with("array_get_") => {
                let index = int(&params[1]) as usize;
                let list = caller.data_mut().list(&params[0])?;
                let item = list
                    .get(index)
                    .copied()
                    .ok_or_else(|| wasmi::Error::new("index out of bounds"))?;
                Some(item)
            }
            _ => return Err(wasmi::Error::new(format!("host does not implement {name}"))),
        };

        let returns_int = matches!(
            name,
            "string_get_size"
                | "string_index_of"
                | "array_get_size"
                | "array_get_integer"
                | "array_pop_integer"
        );
        if let Some(value) = value {
            results[0] = if returns_int {
                Val::I64(value)
            } else {
                Val::I32(value as i32)
            };
        }
        Ok(())
    }

    /// A linker providing every runtime import of `module`.
    fn runtime_linker(engine: &Engine, module: &Module) -> Linker<Host> {
        let mut linker = Linker::new(engine);
        for import in module.imports() {
            let Some(func_ty) = import.ty().func() else {
                continue;
            };
            if import.module() != "quill_rt" {
                continue;
            }
            let name = import.name().to_string();
            linker
                .func_new(
                    "quill_rt",
                    import.name(),
                    func_ty.clone(),
                    move |caller, params, results| dispatch(caller, &name, params, results),
                )
                .expect("define host function");
        }
        linker
    }

    fn compile(ast: &Ast, root: ExprId, env: &TypeEnv) -> CompilationArtifact {
        let artifact = compile_expression(ast, root, env, &TargetContext::default())
            .expect("compile should succeed");
        wasmparser::Validator::new()
            .validate_all(&artifact.wasm)
            .expect("module should validate");
        artifact
    }

    fn run_i64(artifact: &CompilationArtifact) -> (i64, String) {
        let engine = Engine::default();
        let module = Module::new(&engine, &artifact.wasm).expect("module");
        let linker = runtime_linker(&engine, &module);
        let mut store = Store::new(&engine, Host::default());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let main = instance
            .get_typed_func::<(), i64>(&store, "main")
            .expect("typed func");
        let result = main.call(&mut store, ()).expect("execute main");
        (result, store.into_data().output)
    }

    #[test]
    fn executes_integer_arithmetic() {
        let mut ast = Ast::new();
        let two = ast.integer_literal(2);
        let three = ast.integer_literal(3);
        let four = ast.integer_literal(4);
        let mul = ast.binary(BinaryOp::Mul, three, four);
        let add = ast.binary(BinaryOp::Add, two, mul);
        let artifact = compile(&ast, add, &TypeEnv::new());
        assert_eq!(artifact.ty, Type::INTEGER);
        assert_eq!(run_i64(&artifact).0, 14);
    }

    #[test]
    fn imports_every_runtime_symbol() {
        let mut ast = Ast::new();
        let one = ast.integer_literal(1);
        let artifact = compile(&ast, one, &TypeEnv::new());
        assert_eq!(artifact.runtime_symbols.first().map(String::as_str), Some("exit_if_error"));
        for symbol in ["string_create", "array_get_array", "string2integer", "println_string"] {
            assert!(artifact.runtime_symbols.iter().any(|s| s == symbol), "{symbol}");
        }
        assert!(!artifact.runtime_symbols.iter().any(|s| s == "main"));
    }

    #[test]
    fn prints_through_the_runtime() {
        let mut ast = Ast::new();
        let six = ast.integer_literal(6);
        let seven = ast.integer_literal(7);
        let product = ast.binary(BinaryOp::Mul, six, seven);
        let text = ast.call("str", vec![product]);
        let print = ast.call("println", vec![text]);
        let artifact = compile(&ast, print, &TypeEnv::new());
        assert_eq!(artifact.ty, Type::VOID);

        let engine = Engine::default();
        let module = Module::new(&engine, &artifact.wasm).expect("module");
        let linker = runtime_linker(&engine, &module);
        let mut store = Store::new(&engine, Host::default());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let main = instance
            .get_typed_func::<(), ()>(&store, "main")
            .expect("typed func");
        main.call(&mut store, ()).expect("execute main");
        assert_eq!(store.data().output, "42\n");
    }

    #[test]
    fn parses_integers_from_strings() {
        let mut ast = Ast::new();
        let text = ast.string_literal("42");
        let parsed = ast.call("int", vec![text]);
        let one = ast.integer_literal(1);
        let sum = ast.binary(BinaryOp::Add, parsed, one);
        assert_eq!(run_i64(&compile(&ast, sum, &TypeEnv::new())).0, 43);
    }

    #[test]
    fn malformed_integer_exits_through_the_error_check() {
        let mut ast = Ast::new();
        let text = ast.string_literal("4x2");
        let parsed = ast.call("int", vec![text]);
        let artifact = compile(&ast, parsed, &TypeEnv::new());

        let engine = Engine::default();
        let module = Module::new(&engine, &artifact.wasm).expect("module");
        let linker = runtime_linker(&engine, &module);
        let mut store = Store::new(&engine, Host::default());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let main = instance
            .get_typed_func::<(), i64>(&store, "main")
            .expect("typed func");
        let err = main.call(&mut store, ()).expect_err("should exit");
        assert_eq!(err.i32_exit_status(), Some(1));
    }

    #[test]
    fn evaluates_string_builtins() {
        let mut ast = Ast::new();
        let padded = ast.string_literal("  hello world ");
        let trimmed = ast.call("trim", vec![padded]);
        let needle = ast.string_literal("world");
        let found = ast.call("index_of", vec![trimmed, needle]);
        let word = ast.string_literal("abc");
        let size = ast.call("len", vec![word]);
        let sum = ast.binary(BinaryOp::Add, found, size);
        assert_eq!(run_i64(&compile(&ast, sum, &TypeEnv::new())).0, 9);
    }

    #[test]
    fn compares_concatenated_strings() {
        let mut ast = Ast::new();
        let ab = ast.string_literal("ab");
        let cd = ast.string_literal("cd");
        let joined = ast.binary(BinaryOp::Add, ab, cd);
        let expected = ast.string_literal("abcd");
        let same = ast.binary(BinaryOp::Eq, joined, expected);
        let artifact = compile(&ast, same, &TypeEnv::new());
        assert_eq!(artifact.ty, Type::BOOLEAN);

        let engine = Engine::default();
        let module = Module::new(&engine, &artifact.wasm).expect("module");
        let linker = runtime_linker(&engine, &module);
        let mut store = Store::new(&engine, Host::default());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let main = instance
            .get_typed_func::<(), i32>(&store, "main")
            .expect("typed func");
        assert_eq!(main.call(&mut store, ()).expect("execute main"), 1);
    }

    #[test]
    fn indexes_nested_array_literals() {
        let mut ast = Ast::new();
        let items: Vec<_> = (1..=3).map(|n| ast.integer_literal(n)).collect();
        let flat = ast.array_literal(items);
        let size = ast.call("len", vec![flat]);

        let rows: Vec<_> = [[1, 2], [3, 4]]
            .iter()
            .map(|row| {
                let cells = row.iter().map(|&n| ast.integer_literal(n)).collect();
                ast.array_literal(cells)
            })
            .collect();
        let grid = ast.array_literal(rows);
        let row = ast.integer_literal(1);
        let column = ast.integer_literal(0);
        let cell = ast.array_subscript(grid, vec![row, column]);
        let sum = ast.binary(BinaryOp::Add, size, cell);

        assert_eq!(run_i64(&compile(&ast, sum, &TypeEnv::new())).0, 6);
    }

    #[test]
    fn passes_variables_and_calls_host_functions() {
        let mut ast = Ast::new();
        let x = ast.identifier("x");
        let doubled = ast.call("twice", vec![x]);
        let one = ast.integer_literal(1);
        let result = ast.binary(BinaryOp::Sub, doubled, one);

        let mut env = TypeEnv::new();
        env.declare_variable("x", Type::INTEGER);
        env.declare_function(
            "twice",
            FunctionSignature {
                params: vec![Type::INTEGER],
                result: Type::INTEGER,
            },
        );
        let artifact = compile(&ast, result, &env);
        assert!(!artifact.runtime_symbols.iter().any(|s| s == "twice"));

        let engine = Engine::default();
        let module = Module::new(&engine, &artifact.wasm).expect("module");
        let mut linker = runtime_linker(&engine, &module);
        linker
            .func_wrap("env", "twice", |value: i64| -> i64 { value * 2 })
            .expect("link twice");
        let mut store = Store::new(&engine, Host::default());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let main = instance
            .get_typed_func::<i64, i64>(&store, "main")
            .expect("typed func");
        assert_eq!(main.call(&mut store, 5).expect("execute main"), 9);
    }

    #[test]
    fn host_functions_named_like_runtime_symbols_stay_separate() {
        let mut ast = Ast::new();
        let five = ast.integer_literal(5);
        let call = ast.call("print_integer", vec![five]);

        let mut env = TypeEnv::new();
        env.declare_function(
            "print_integer",
            FunctionSignature {
                params: vec![Type::INTEGER],
                result: Type::INTEGER,
            },
        );
        let artifact = compile(&ast, call, &env);
        assert_eq!(artifact.ty, Type::INTEGER);
        assert!(artifact.runtime_symbols.iter().any(|s| s == "print_integer"));

        let engine = Engine::default();
        let module = Module::new(&engine, &artifact.wasm).expect("module");
        let host_imports: Vec<_> = module
            .imports()
            .filter(|import| import.module() == "env")
            .map(|import| import.name().to_string())
            .collect();
        assert_eq!(host_imports, vec!["print_integer".to_string()]);

        let mut linker = runtime_linker(&engine, &module);
        linker
            .func_wrap("env", "print_integer", |value: i64| -> i64 { value * 10 })
            .expect("link host print_integer");
        let mut store = Store::new(&engine, Host::default());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let main = instance
            .get_typed_func::<(), i64>(&store, "main")
            .expect("typed func");
        assert_eq!(main.call(&mut store, ()).expect("execute main"), 50);
        assert_eq!(store.data().output, "");
    }

    #[test]
    fn rejects_host_functions_that_clash_with_reserved_names() {
        let signature = FunctionSignature {
            params: vec![Type::INTEGER],
            result: Type::INTEGER,
        };
        let mut ast = Ast::new();
        let one = ast.integer_literal(1);
        let call = ast.call("main", vec![one]);
        let mut env = TypeEnv::new();
        env.declare_function("main", signature.clone());
        assert_eq!(
            compile_expression(&ast, call, &env, &TargetContext::default()),
            Err(CoreError::NameClash("main".to_string()))
        );

        let two = ast.integer_literal(2);
        let call = ast.call("print_integer", vec![two]);
        let mut env = TypeEnv::new();
        env.declare_function("print_integer", signature);
        let shared = TargetContext::default().with_host_module("quill_rt");
        assert_eq!(
            compile_expression(&ast, call, &env, &shared),
            Err(CoreError::NameClash("print_integer".to_string()))
        );
    }

    #[test]
    fn honours_configured_names() {
        let mut ast = Ast::new();
        let one = ast.integer_literal(1);
        let context = TargetContext::default()
            .with_runtime_module("rt")
            .with_entry_name("run");
        let artifact =
            compile_expression(&ast, one, &TypeEnv::new(), &context).expect("compile");

        let engine = Engine::default();
        let module = Module::new(&engine, &artifact.wasm).expect("module");
        assert!(module.imports().all(|import| import.module() == "rt"));
        assert!(module.exports().any(|export| export.name() == "run"));
    }

    #[test]
    fn reports_semantic_errors() {
        let mut ast = Ast::new();
        let y = ast.identifier("y");
        assert_eq!(
            compile_expression(&ast, y, &TypeEnv::new(), &TargetContext::default()),
            Err(CoreError::UnresolvedIdentifier("y".to_string()))
        );

        let text = ast.string_literal("a");
        let two = ast.integer_literal(2);
        let bad = ast.binary(BinaryOp::Sub, text, two);
        assert!(matches!(
            compile_expression(&ast, bad, &TypeEnv::new(), &TargetContext::default()),
            Err(CoreError::TypeMismatch { .. })
        ));
    }
}
