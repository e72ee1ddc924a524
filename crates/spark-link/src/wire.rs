//! JSON 线缆格式。
//!
//! - 单请求：`{ id, type, path, input }`；
//! - 单响应：`{ id, result: { type: "data" | "error", data?, error? } }`；
//! - 批量请求与批量响应：按位置对齐的数组；
//! - 批处理未启用：服务端返回非数组的错误体 `{ error: { code: -32005, message } }`。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{LinkError, Result},
    operation::{Operation, OperationId, OperationType, ResultEnvelope},
    transport::{Transformer, WireResponse},
};

/// 服务端拒绝批量调用时使用的错误码。
pub const METHOD_NOT_SUPPORTED: i64 = -32005;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub id: OperationId,
    #[serde(rename = "type")]
    pub kind: OperationType,
    pub path: String,
    pub input: Value,
}

/// 服务端结构化错误。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WireError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResultPayload {
    Data {
        #[serde(default)]
        data: Value,
    },
    Error {
        error: WireError,
    },
}

/// 一条响应。`result` 与顶层 `error` 二选一；顶层 `error` 用于整体失败的请求。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<OperationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl ResponseBody {
    pub fn data(id: OperationId, data: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(ResultPayload::Data { data }),
            error: None,
        }
    }

    pub fn failure(id: OperationId, error: WireError) -> Self {
        Self {
            id: Some(id),
            result: Some(ResultPayload::Error { error }),
            error: None,
        }
    }
}

fn request_body(operation: &Operation, transformer: &dyn Transformer) -> Result<RequestBody> {
    Ok(RequestBody {
        id: operation.id(),
        kind: operation.kind(),
        path: operation.path().to_owned(),
        input: transformer.serialize(operation.input())?,
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|err| LinkError::internal(format!("failed to encode request: {err}")))
}

pub fn encode_single(operation: &Operation, transformer: &dyn Transformer) -> Result<String> {
    to_json(&request_body(operation, transformer)?)
}

/// 按登记顺序编码批量请求体。
pub fn encode_batch<'a>(
    operations: impl IntoIterator<Item = &'a Operation>,
    transformer: &dyn Transformer,
) -> Result<String> {
    let bodies = operations
        .into_iter()
        .map(|operation| request_body(operation, transformer))
        .collect::<Result<Vec<_>>>()?;
    to_json(&bodies)
}

/// 解析为 JSON；非 2xx 且不可解析的响应视为传输失败。
fn parse(response: &WireResponse) -> Result<Value> {
    match serde_json::from_str::<Value>(&response.body) {
        Ok(value) => Ok(value),
        Err(_) if !response.is_success() => Err(LinkError::transport(format!(
            "unexpected http status {}",
            response.status
        ))),
        Err(err) => Err(LinkError::malformed(format!("response is not json: {err}"))),
    }
}

fn into_body(value: Value) -> Result<ResponseBody> {
    serde_json::from_value(value)
        .map_err(|err| LinkError::malformed(format!("unexpected response shape: {err}")))
}

pub fn decode_single(response: &WireResponse) -> Result<ResponseBody> {
    into_body(parse(response)?)
}

/// 解码批量响应。
///
/// # 契约说明（What）
/// - 数组：逐项解码，长度与 id 的校验留给调用方；
/// - 非数组的错误体：错误码为 [`METHOD_NOT_SUPPORTED`] 时返回 [`LinkError::BatchingDisabled`]，
///   否则返回 [`LinkError::Server`]；二者都由调用方扇出给组内所有成员；
/// - 其余形态：[`LinkError::MalformedResponse`]。
pub fn decode_batch(response: &WireResponse) -> Result<Vec<ResponseBody>> {
    match parse(response)? {
        Value::Array(items) => items.into_iter().map(into_body).collect(),
        other => {
            let body = into_body(other)?;
            let error = match (body.error, body.result) {
                (Some(error), _) | (None, Some(ResultPayload::Error { error })) => error,
                _ => return Err(LinkError::malformed("batched response is not an array")),
            };
            if error.code == METHOD_NOT_SUPPORTED {
                Err(LinkError::BatchingDisabled {
                    message: error.message,
                })
            } else {
                Err(LinkError::server(error))
            }
        }
    }
}

/// 把一条响应还原为结果信封，并校验其 `id`。
pub fn resolve_item(
    body: ResponseBody,
    expected: OperationId,
    transformer: &dyn Transformer,
) -> Result<ResultEnvelope> {
    if let Some(id) = body.id
        && id != expected
    {
        return Err(LinkError::malformed(format!(
            "response id {id} does not match operation {expected}"
        )));
    }
    match (body.result, body.error) {
        (Some(ResultPayload::Data { data }), None) => {
            Ok(ResultEnvelope::new(expected, transformer.deserialize(data)?))
        }
        (Some(ResultPayload::Error { error }), _) | (None, Some(error)) => {
            Err(LinkError::server(error))
        }
        (Some(ResultPayload::Data { .. }), Some(error)) => Err(LinkError::server(error)),
        (None, None) => Err(LinkError::malformed("response carries neither result nor error")),
    }
}
