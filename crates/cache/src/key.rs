use serde_json::Value;

/// Builds the cache key for a lookup: `"{chain}:{method}:[p1,p2,…]"`.
///
/// Params are rendered canonically — strings unquoted, booleans as
/// `true`/`false`, array order preserved — so two requests that differ only
/// in their ids share a key.
pub fn cache_key(chain: &str, method: &str, params: Option<&Value>) -> String {
    let mut rendered = String::new();
    match params {
        Some(Value::Array(items)) => {
            rendered.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    rendered.push(',');
                }
                render(item, &mut rendered);
            }
            rendered.push(']');
        }
        Some(other) => render_wrapped(other, &mut rendered),
        None => rendered.push_str("[]"),
    }
    format!("{chain}:{method}:{rendered}")
}

fn render_wrapped(value: &Value, out: &mut String) {
    out.push('[');
    render(value, out);
    out.push(']');
}

fn render(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(key);
                out.push(':');
                render(item, out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn renders_strings_unquoted() {
        assert_eq!(
            cache_key("mainnet", "eth_getTransactionReceipt", Some(&json!(["0x3a6fef1"]))),
            "mainnet:eth_getTransactionReceipt:[0x3a6fef1]"
        );
    }

    #[test]
    fn renders_mixed_params_in_order() {
        assert_eq!(
            cache_key("mainnet", "eth_getBlockByNumber", Some(&json!(["latest", false]))),
            "mainnet:eth_getBlockByNumber:[latest,false]"
        );
        assert_eq!(
            cache_key("mainnet", "eth_getBalance", Some(&json!(["0xabc", 12, null, true]))),
            "mainnet:eth_getBalance:[0xabc,12,null,true]"
        );
    }

    #[test]
    fn renders_nested_structures() {
        let params = json!([{"fromBlock": "0x1", "toBlock": "latest"}, ["0xa", "0xb"]]);
        assert_eq!(
            cache_key("mainnet", "eth_getLogs", Some(&params)),
            "mainnet:eth_getLogs:[{fromBlock:0x1,toBlock:latest},[0xa,0xb]]"
        );
    }

    #[test]
    fn missing_params_render_empty() {
        assert_eq!(cache_key("mainnet", "eth_blockNumber", None), "mainnet:eth_blockNumber:[]");
    }

    #[test]
    fn identical_method_and_params_share_a_key() {
        // Ids do not participate in the key at all.
        let a = cache_key("mainnet", "eth_call", Some(&json!([{"to": "0x1"}, "latest"])));
        let b = cache_key("mainnet", "eth_call", Some(&json!([{"to": "0x1"}, "latest"])));
        assert_eq!(a, b);
        assert_ne!(a, cache_key("goerli", "eth_call", Some(&json!([{"to": "0x1"}, "latest"]))));
    }
}
