//! Built-in opcodes: arithmetic, comparison, boolean logic, channels,
//! tasks, and a couple of demo-friendly I/O primitives. Grounded on the
//! same `OpcodeFn`/`Signature` surface as [`crate::opcode`]; nothing
//! here is privileged.

use std::sync::Arc;

use crate::channel::Channel;
use crate::error::{LexFlowError, LexFlowResult};
use crate::opcode::{Category, OpcodeRegistry, Param, Signature};
use crate::value::{Handle, Value};

fn num(v: &Value) -> LexFlowResult<f64> {
    match v {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(n) => Ok(*n),
        other => Err(LexFlowError::TypeError(format!("expected a number, got {other}"))),
    }
}

fn int_if_whole(n: f64) -> Value {
    if n.fract() == 0.0 && n.is_finite() {
        Value::Int(n as i64)
    } else {
        Value::Float(n)
    }
}

/// Registers every built-in opcode (and its category metadata) on `registry`.
/// `output`, if given, is where `io_print` streams its text instead of
/// stdout — the same sink the engine hands to [`crate::engine::Ctx`].
pub fn register_builtins(registry: &OpcodeRegistry, output: Option<Arc<dyn Fn(Value) + Send + Sync>>) {
    registry.register_category(Category {
        id: "arithmetic".into(),
        label: "Arithmetic".into(),
        name_prefix: "op_".into(),
        color: Some("#3b82f6".into()),
        icon: None,
        display_order: 0,
        install_extra: None,
    });
    registry.register_category(Category {
        id: "logic".into(),
        label: "Logic".into(),
        name_prefix: "compare_".into(),
        color: Some("#22c55e".into()),
        icon: None,
        display_order: 1,
        install_extra: None,
    });
    registry.register_category(Category {
        id: "concurrency".into(),
        label: "Concurrency".into(),
        name_prefix: "channel_".into(),
        color: Some("#a855f7".into()),
        icon: None,
        display_order: 2,
        install_extra: None,
    });

    let binop = || Signature::new(vec![Param::required("a"), Param::required("b")]);

    registry.register("op_add", binop(), Some("arithmetic".into()), |args: Vec<Value>| async move {
        Ok(int_if_whole(num(&args[0])? + num(&args[1])?))
    });
    registry.register("op_sub", binop(), Some("arithmetic".into()), |args: Vec<Value>| async move {
        Ok(int_if_whole(num(&args[0])? - num(&args[1])?))
    });
    registry.register("op_mul", binop(), Some("arithmetic".into()), |args: Vec<Value>| async move {
        Ok(int_if_whole(num(&args[0])? * num(&args[1])?))
    });
    registry.register("op_div", binop(), Some("arithmetic".into()), |args: Vec<Value>| async move {
        let b = num(&args[1])?;
        if b == 0.0 {
            return Err(LexFlowError::ZeroDivisionError("division by zero".into()));
        }
        Ok(int_if_whole(num(&args[0])? / b))
    });
    registry.register("op_mod", binop(), Some("arithmetic".into()), |args: Vec<Value>| async move {
        let b = num(&args[1])?;
        if b == 0.0 {
            return Err(LexFlowError::ZeroDivisionError("modulo by zero".into()));
        }
        Ok(int_if_whole(num(&args[0])? % b))
    });

    registry.register("compare_eq", binop(), Some("logic".into()), |args: Vec<Value>| async move {
        Ok(Value::Bool(args[0] == args[1]))
    });
    registry.register("compare_neq", binop(), Some("logic".into()), |args: Vec<Value>| async move {
        Ok(Value::Bool(args[0] != args[1]))
    });
    registry.register("compare_lt", binop(), Some("logic".into()), |args: Vec<Value>| async move {
        Ok(Value::Bool(num(&args[0])? < num(&args[1])?))
    });
    registry.register("compare_lte", binop(), Some("logic".into()), |args: Vec<Value>| async move {
        Ok(Value::Bool(num(&args[0])? <= num(&args[1])?))
    });
    registry.register("compare_gt", binop(), Some("logic".into()), |args: Vec<Value>| async move {
        Ok(Value::Bool(num(&args[0])? > num(&args[1])?))
    });
    registry.register("compare_gte", binop(), Some("logic".into()), |args: Vec<Value>| async move {
        Ok(Value::Bool(num(&args[0])? >= num(&args[1])?))
    });
    registry.register(
        "bool_and",
        binop(),
        Some("logic".into()),
        |args: Vec<Value>| async move { Ok(Value::Bool(args[0].truthy() && args[1].truthy())) },
    );
    registry.register(
        "bool_or",
        binop(),
        Some("logic".into()),
        |args: Vec<Value>| async move { Ok(Value::Bool(args[0].truthy() || args[1].truthy())) },
    );
    registry.register(
        "bool_not",
        Signature::new(vec![Param::required("a")]),
        Some("logic".into()),
        |args: Vec<Value>| async move { Ok(Value::Bool(!args[0].truthy())) },
    );

    registry.register(
        "assert_true",
        Signature::new(vec![
            Param::required("condition"),
            Param::with_default("message", Value::String("assertion failed".into())),
        ]),
        None,
        |args: Vec<Value>| async move {
            if args[0].truthy() {
                Ok(Value::Null)
            } else {
                Err(LexFlowError::AssertionError(
                    args[1].as_str().unwrap_or("assertion failed").to_string(),
                ))
            }
        },
    );

    registry.register(
        "io_print",
        Signature::variadic(vec![]),
        None,
        move |args: Vec<Value>| {
            let output = output.clone();
            async move {
                let joined = args.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
                match &output {
                    Some(sink) => sink(Value::String(joined)),
                    None => println!("{joined}"),
                }
                Ok(Value::Null)
            }
        },
    );

    registry.register(
        "time_sleep",
        Signature::new(vec![Param::required("seconds")]),
        None,
        |args: Vec<Value>| async move {
            let secs = num(&args[0])?;
            tokio::time::sleep(std::time::Duration::from_secs_f64(secs.max(0.0))).await;
            Ok(Value::Null)
        },
    );

    registry.register(
        "channel_new",
        Signature::new(vec![Param::with_default("capacity", Value::Int(16))]),
        Some("concurrency".into()),
        |args: Vec<Value>| async move {
            let capacity = args[0].as_int().unwrap_or(16).max(0) as usize;
            Ok(Value::Handle(Handle::Channel(Arc::new(Channel::new(capacity)))))
        },
    );
    registry.register(
        "channel_send",
        Signature::new(vec![Param::required("channel"), Param::required("value")]),
        Some("concurrency".into()),
        |args: Vec<Value>| async move {
            let channel = args[0]
                .as_channel()
                .ok_or_else(|| LexFlowError::TypeError("`channel_send` requires a channel handle".into()))?;
            channel.send(args[1].clone()).await?;
            Ok(Value::Null)
        },
    );
    registry.register(
        "channel_receive",
        Signature::new(vec![Param::required("channel"), Param::with_default("timeout", Value::Null)]),
        Some("concurrency".into()),
        |args: Vec<Value>| async move {
            let channel = args[0]
                .as_channel()
                .ok_or_else(|| LexFlowError::TypeError("`channel_receive` requires a channel handle".into()))?;
            let timeout = args[1].as_f64();
            channel.receive(timeout).await
        },
    );
    registry.register(
        "channel_close",
        Signature::new(vec![Param::required("channel")]),
        Some("concurrency".into()),
        |args: Vec<Value>| async move {
            let channel = args[0]
                .as_channel()
                .ok_or_else(|| LexFlowError::TypeError("`channel_close` requires a channel handle".into()))?;
            channel.close();
            Ok(Value::Null)
        },
    );

    registry.register(
        "task_wait",
        Signature::new(vec![Param::required("task"), Param::with_default("timeout", Value::Null)]),
        Some("concurrency".into()),
        |args: Vec<Value>| async move {
            let task = args[0]
                .as_task()
                .ok_or_else(|| LexFlowError::TypeError("`task_wait` requires a task handle".into()))?;
            let timeout = args[1].as_f64();
            task.wait(timeout).await
        },
    );
    registry.register(
        "task_cancel",
        Signature::new(vec![Param::required("task")]),
        Some("concurrency".into()),
        |args: Vec<Value>| async move {
            let task = args[0]
                .as_task()
                .ok_or_else(|| LexFlowError::TypeError("`task_cancel` requires a task handle".into()))?;
            task.cancel();
            Ok(Value::Null)
        },
    );

    registry.register_privileged("introspect_context", Signature::default());
    registry.register_privileged(
        "workflow_as_tool",
        Signature::new(vec![Param::required("workflow_name")]),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // test assertions
mod tests {
    use super::*;

    #[tokio::test]
    async fn op_div_by_zero_is_a_zero_division_error() {
        let registry = OpcodeRegistry::new();
        register_builtins(&registry, None);
        let err = registry
            .call("op_div", vec![Value::Int(1), Value::Int(0)])
            .await
            .unwrap_err();
        assert!(matches!(err, LexFlowError::ZeroDivisionError(_)));
    }

    #[tokio::test]
    async fn assert_true_raises_with_message() {
        let registry = OpcodeRegistry::new();
        register_builtins(&registry, None);
        let err = registry
            .call("assert_true", vec![Value::Bool(false), Value::String("nope".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, LexFlowError::AssertionError(m) if m == "nope"));
    }

    #[tokio::test]
    async fn channel_roundtrips_a_value() {
        let registry = OpcodeRegistry::new();
        register_builtins(&registry, None);
        let handle = registry.call("channel_new", vec![Value::Int(4)]).await.unwrap();
        registry
            .call("channel_send", vec![handle.clone(), Value::Int(42)])
            .await
            .unwrap();
        let v = registry.call("channel_receive", vec![handle, Value::Null]).await.unwrap();
        assert_eq!(v, Value::Int(42));
    }

    #[tokio::test]
    async fn privileged_opcodes_raise_until_a_host_injects_them() {
        let registry = OpcodeRegistry::new();
        register_builtins(&registry, None);
        let err = registry
            .call("workflow_as_tool", vec![Value::String("helper".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, LexFlowError::PrivilegedNotInjected(name) if name == "workflow_as_tool"));
    }
}
