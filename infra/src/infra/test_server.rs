//! In-process gRPC server with reflection, for tests.
//!
//! Serves `greet.Greeter` (hand-written, no code generation) next to the
//! reflection service, and publishes the fixture files of [`fixtures`].

use crate::infra::reflection::ReflectionVersion;
use anyhow::Result;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codegen::{Body, BoxFuture, BoxStream, StdError};
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::transport::Server;
use tonic::{Code, Status};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloReply {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
}

/// `SayHello` answers `Hello, <name>` with an `x-greeting` header and echoes
/// every `x-request-id` it received. `SayHellos` streams a greeting and a
/// farewell. `SayHelloStrict` rejects an empty name with INVALID_ARGUMENT and
/// an `x-reason` trailer.
#[derive(Debug, Clone, Default)]
pub struct GreeterService;

async fn say_hello(
    request: tonic::Request<HelloRequest>,
) -> Result<tonic::Response<HelloReply>, Status> {
    let echoed: Vec<AsciiMetadataValue> = request
        .metadata()
        .get_all("x-request-id")
        .iter()
        .cloned()
        .collect();
    let name = request.into_inner().name;
    let mut response = tonic::Response::new(HelloReply {
        message: format!("Hello, {}", name),
    });
    response
        .metadata_mut()
        .insert("x-greeting", AsciiMetadataValue::from_static("hello"));
    for value in echoed {
        response.metadata_mut().append("x-request-id", value);
    }
    Ok(response)
}

async fn say_hellos(
    request: tonic::Request<HelloRequest>,
) -> Result<tonic::Response<BoxStream<HelloReply>>, Status> {
    let name = request.into_inner().name;
    let replies = vec![
        Ok(HelloReply {
            message: format!("Hello, {}", name),
        }),
        Ok(HelloReply {
            message: format!("Goodbye, {}", name),
        }),
    ];
    let stream: BoxStream<HelloReply> = Box::pin(tokio_stream::iter(replies));
    Ok(tonic::Response::new(stream))
}

async fn say_hello_strict(
    request: tonic::Request<HelloRequest>,
) -> Result<tonic::Response<HelloReply>, Status> {
    if request.get_ref().name.is_empty() {
        let mut md = MetadataMap::new();
        md.insert("x-reason", AsciiMetadataValue::from_static("empty-name"));
        return Err(Status::with_metadata(
            Code::InvalidArgument,
            "name must not be empty",
            md,
        ));
    }
    say_hello(request).await
}

impl<B> tonic::codegen::Service<http::Request<B>> for GreeterService
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        match req.uri().path() {
            "/greet.Greeter/SayHello" => {
                struct SayHelloSvc;
                impl tonic::server::UnaryService<HelloRequest> for SayHelloSvc {
                    type Response = HelloReply;
                    type Future = BoxFuture<tonic::Response<Self::Response>, Status>;
                    fn call(&mut self, request: tonic::Request<HelloRequest>) -> Self::Future {
                        Box::pin(say_hello(request))
                    }
                }
                Box::pin(async move {
                    let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                    Ok(grpc.unary(SayHelloSvc, req).await)
                })
            }
            "/greet.Greeter/SayHellos" => {
                struct SayHellosSvc;
                impl tonic::server::ServerStreamingService<HelloRequest> for SayHellosSvc {
                    type Response = HelloReply;
                    type ResponseStream = BoxStream<HelloReply>;
                    type Future = BoxFuture<tonic::Response<Self::ResponseStream>, Status>;
                    fn call(&mut self, request: tonic::Request<HelloRequest>) -> Self::Future {
                        Box::pin(say_hellos(request))
                    }
                }
                Box::pin(async move {
                    let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                    Ok(grpc.server_streaming(SayHellosSvc, req).await)
                })
            }
            "/greet.Greeter/SayHelloStrict" => {
                struct SayHelloStrictSvc;
                impl tonic::server::UnaryService<HelloRequest> for SayHelloStrictSvc {
                    type Response = HelloReply;
                    type Future = BoxFuture<tonic::Response<Self::Response>, Status>;
                    fn call(&mut self, request: tonic::Request<HelloRequest>) -> Self::Future {
                        Box::pin(say_hello_strict(request))
                    }
                }
                Box::pin(async move {
                    let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                    Ok(grpc.unary(SayHelloStrictSvc, req).await)
                })
            }
            _ => Box::pin(async move {
                let mut response = http::Response::new(tonic::body::Body::default());
                let headers = response.headers_mut();
                headers.insert(
                    tonic::Status::GRPC_STATUS,
                    (Code::Unimplemented as i32).into(),
                );
                headers.insert(
                    http::header::CONTENT_TYPE,
                    tonic::metadata::GRPC_CONTENT_TYPE,
                );
                Ok(response)
            }),
        }
    }
}

impl tonic::server::NamedService for GreeterService {
    const NAME: &'static str = "greet.Greeter";
}

/// A running server, shut down when dropped.
pub struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(ReflectionVersion::V1).await
    }

    /// Serve only the given reflection protocol version.
    pub async fn spawn_with(version: ReflectionVersion) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let reflection = tonic_reflection::server::Builder::configure()
            .register_file_descriptor_set(fixtures::file_descriptor_set());
        let router = match version {
            ReflectionVersion::V1 => Server::builder()
                .add_service(reflection.build_v1()?)
                .add_service(GreeterService),
            ReflectionVersion::V1Alpha => Server::builder()
                .add_service(reflection.build_v1alpha()?)
                .add_service(GreeterService),
        };
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let res = router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    let _ = rx.await;
                })
                .await;
            if let Err(e) = res {
                tracing::error!("test server error: {:?}", e);
            }
        });
        tracing::debug!("test server listening on {}", addr);
        Ok(Self {
            addr,
            shutdown: Some(tx),
        })
    }

    /// `host:port` without scheme, as configured by users.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Descriptor files built by hand: `greet/greeter.proto`, `shop/order.proto`
/// (proto3 with map, oneof, enum and optional fields), `legacy/record.proto`
/// (proto2 with group, defaults, extension range and an extension) and
/// `billing/receipt.proto` (cross-file and well-known type references).
pub mod fixtures {
    use anyhow::Result;
    use prost_reflect::DescriptorPool;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{
        descriptor_proto::{ExtensionRange, ReservedRange},
        DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
        FieldOptions, FileDescriptorProto, FileDescriptorSet, MessageOptions,
        MethodDescriptorProto, OneofDescriptorProto, ServiceDescriptorProto,
    };

    fn field(name: &str, number: i32, label: Label, ty: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(label as i32),
            r#type: Some(ty as i32),
            ..Default::default()
        }
    }

    fn typed_field(
        name: &str,
        number: i32,
        label: Label,
        ty: Type,
        type_name: &str,
    ) -> FieldDescriptorProto {
        FieldDescriptorProto {
            type_name: Some(type_name.to_string()),
            ..field(name, number, label, ty)
        }
    }

    fn in_oneof(mut f: FieldDescriptorProto, index: i32) -> FieldDescriptorProto {
        f.oneof_index = Some(index);
        f
    }

    fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
        DescriptorProto {
            name: Some(name.to_string()),
            field: fields,
            ..Default::default()
        }
    }

    fn map_entry(name: &str, key: Type, value: Type) -> DescriptorProto {
        DescriptorProto {
            options: Some(MessageOptions {
                map_entry: Some(true),
                ..Default::default()
            }),
            ..message(
                name,
                vec![
                    field("key", 1, Label::Optional, key),
                    field("value", 2, Label::Optional, value),
                ],
            )
        }
    }

    fn method(name: &str, input: &str, output: &str, client: bool, server: bool) -> MethodDescriptorProto {
        MethodDescriptorProto {
            name: Some(name.to_string()),
            input_type: Some(input.to_string()),
            output_type: Some(output.to_string()),
            client_streaming: Some(client),
            server_streaming: Some(server),
            ..Default::default()
        }
    }

    pub fn greeter_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("greet/greeter.proto".to_string()),
            package: Some("greet".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![
                message(
                    "HelloRequest",
                    vec![field("name", 1, Label::Optional, Type::String)],
                ),
                message(
                    "HelloReply",
                    vec![field("message", 1, Label::Optional, Type::String)],
                ),
            ],
            service: vec![ServiceDescriptorProto {
                name: Some("Greeter".to_string()),
                method: vec![
                    method("SayHello", ".greet.HelloRequest", ".greet.HelloReply", false, false),
                    method("SayHellos", ".greet.HelloRequest", ".greet.HelloReply", false, true),
                    method(
                        "SayHelloStrict",
                        ".greet.HelloRequest",
                        ".greet.HelloReply",
                        false,
                        false,
                    ),
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    pub fn order_file() -> FileDescriptorProto {
        let note = FieldDescriptorProto {
            proto3_optional: Some(true),
            ..in_oneof(field("note", 7, Label::Optional, Type::String), 1)
        };
        let order = DescriptorProto {
            nested_type: vec![
                message(
                    "Item",
                    vec![
                        field("sku", 1, Label::Optional, Type::String),
                        field("quantity", 2, Label::Optional, Type::Int32),
                    ],
                ),
                map_entry("AttributesEntry", Type::String, Type::String),
            ],
            enum_type: vec![EnumDescriptorProto {
                name: Some("Status".to_string()),
                value: ["STATUS_UNSPECIFIED", "PENDING", "SHIPPED"]
                    .iter()
                    .enumerate()
                    .map(|(i, name)| EnumValueDescriptorProto {
                        name: Some(name.to_string()),
                        number: Some(i as i32),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }],
            oneof_decl: vec![
                OneofDescriptorProto {
                    name: Some("payment".to_string()),
                    ..Default::default()
                },
                OneofDescriptorProto {
                    name: Some("_note".to_string()),
                    ..Default::default()
                },
            ],
            ..message(
                "Order",
                vec![
                    field("id", 1, Label::Optional, Type::String),
                    typed_field("items", 2, Label::Repeated, Type::Message, ".shop.Order.Item"),
                    typed_field(
                        "attributes",
                        3,
                        Label::Repeated,
                        Type::Message,
                        ".shop.Order.AttributesEntry",
                    ),
                    typed_field("status", 4, Label::Optional, Type::Enum, ".shop.Order.Status"),
                    in_oneof(field("card", 5, Label::Optional, Type::String), 0),
                    in_oneof(field("voucher", 6, Label::Optional, Type::String), 0),
                    note,
                    field("total_cents", 8, Label::Optional, Type::Int64),
                ],
            )
        };
        FileDescriptorProto {
            name: Some("shop/order.proto".to_string()),
            package: Some("shop".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![order],
            service: vec![ServiceDescriptorProto {
                name: Some("OrderService".to_string()),
                method: vec![
                    method("GetOrder", ".shop.Order", ".shop.Order", false, false),
                    method("Watch", ".shop.Order", ".shop.Order", true, true),
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    pub fn legacy_file() -> FileDescriptorProto {
        let label = FieldDescriptorProto {
            default_value: Some("none".to_string()),
            ..field("label", 2, Label::Optional, Type::String)
        };
        let scores = FieldDescriptorProto {
            options: Some(FieldOptions {
                packed: Some(true),
                ..Default::default()
            }),
            ..field("scores", 3, Label::Repeated, Type::Int32)
        };
        let legacy_name = FieldDescriptorProto {
            options: Some(FieldOptions {
                deprecated: Some(true),
                ..Default::default()
            }),
            ..field("legacy_name", 5, Label::Optional, Type::String)
        };
        let record = DescriptorProto {
            nested_type: vec![message(
                "Audit",
                vec![field("by", 1, Label::Optional, Type::String)],
            )],
            extension_range: vec![ExtensionRange {
                start: Some(100),
                end: Some(200),
                ..Default::default()
            }],
            reserved_range: vec![ReservedRange {
                start: Some(10),
                end: Some(12),
            }],
            reserved_name: vec!["old".to_string()],
            ..message(
                "Record",
                vec![
                    field("id", 1, Label::Required, Type::Int64),
                    label,
                    scores,
                    typed_field("audit", 4, Label::Optional, Type::Group, ".legacy.Record.Audit"),
                    legacy_name,
                ],
            )
        };
        FileDescriptorProto {
            name: Some("legacy/record.proto".to_string()),
            package: Some("legacy".to_string()),
            syntax: Some("proto2".to_string()),
            message_type: vec![record],
            extension: vec![FieldDescriptorProto {
                extendee: Some(".legacy.Record".to_string()),
                ..field("priority", 100, Label::Optional, Type::Int32)
            }],
            ..Default::default()
        }
    }

    /// A map entry message that no field uses.
    pub fn orphan_map_entry_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("broken/holder.proto".to_string()),
            package: Some("broken".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![DescriptorProto {
                nested_type: vec![map_entry("LooseEntry", Type::String, Type::String)],
                ..message("Holder", vec![])
            }],
            ..Default::default()
        }
    }

    /// A file importing `shop/order.proto` and the well-known
    /// `google/protobuf/timestamp.proto`, which the test server does not publish.
    pub fn receipt_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("billing/receipt.proto".to_string()),
            package: Some("billing".to_string()),
            syntax: Some("proto3".to_string()),
            dependency: vec![
                "shop/order.proto".to_string(),
                "google/protobuf/timestamp.proto".to_string(),
            ],
            message_type: vec![message(
                "Receipt",
                vec![
                    typed_field("order", 1, Label::Optional, Type::Message, ".shop.Order"),
                    typed_field(
                        "issued_at",
                        2,
                        Label::Optional,
                        Type::Message,
                        ".google.protobuf.Timestamp",
                    ),
                ],
            )],
            ..Default::default()
        }
    }

    /// Files published by the test server.
    pub fn file_descriptor_set() -> FileDescriptorSet {
        FileDescriptorSet {
            file: vec![greeter_file(), order_file(), legacy_file(), receipt_file()],
        }
    }

    /// Every published fixture on top of the well-known types.
    pub fn all_fixtures_pool() -> Result<DescriptorPool> {
        let mut pool = DescriptorPool::global();
        pool.add_file_descriptor_set(file_descriptor_set())?;
        Ok(pool)
    }

    pub fn orphan_map_entry_pool() -> Result<DescriptorPool> {
        Ok(DescriptorPool::from_file_descriptor_set(FileDescriptorSet {
            file: vec![orphan_map_entry_file()],
        })?)
    }
}
