use super::{find_symbol, Descriptor};
use crate::infra::grpc::GrpcConnection;
use crate::infra::reflection::ReflectionClient;
use anyhow::Result;
use prost_reflect::{DescriptorPool, MethodDescriptor};
use prost_types::FileDescriptorProto;
use reflectrpc_base::error::ReflectRpcError;
use std::collections::BTreeMap;

/// Descriptors of one server, fetched lazily through reflection.
///
/// The pool only grows: files are added as symbols are resolved and stay for
/// the lifetime of the source, so resolving a name twice yields the same
/// descriptor without another round trip.
#[derive(Debug)]
pub struct DescriptorSource {
    client: ReflectionClient,
    pool: DescriptorPool,
}

impl DescriptorSource {
    pub fn new(connection: &GrpcConnection) -> Self {
        Self::from_client(ReflectionClient::new(connection.channel()))
    }

    pub fn from_client(client: ReflectionClient) -> Self {
        Self {
            client,
            pool: DescriptorPool::new(),
        }
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Service names sorted by name, reflection services excluded.
    pub async fn list_services(&mut self) -> Result<Vec<String>> {
        let mut services: Vec<String> = self
            .client
            .list_services()
            .await?
            .into_iter()
            .filter(|s| !reflectrpc_base::is_reflection_service(s))
            .collect();
        services.sort();
        Ok(services)
    }

    pub async fn resolve_symbol(&mut self, name: &str) -> Result<Descriptor> {
        let name = name.trim();
        let name = name.strip_prefix('.').unwrap_or(name);
        if name.is_empty() {
            return Err(ReflectRpcError::InvalidParameter("symbol name is empty".to_string()).into());
        }
        if let Some(d) = find_symbol(&self.pool, name) {
            return Ok(d);
        }
        self.fetch_symbol(name).await?;
        find_symbol(&self.pool, name)
            .ok_or_else(|| ReflectRpcError::NotFound(name.to_string()).into())
    }

    /// Resolve an invocable method from `pkg.Service/Method` or `pkg.Service.Method`.
    pub async fn resolve_method(&mut self, name: &str) -> Result<MethodDescriptor> {
        let trimmed = name.trim().trim_start_matches(['/', '.']);
        let (service, method) = trimmed
            .rsplit_once('/')
            .or_else(|| trimmed.rsplit_once('.'))
            .filter(|(s, m)| !s.is_empty() && !m.is_empty())
            .ok_or_else(|| {
                ReflectRpcError::InvalidParameter(format!(
                    "method name must be package.Service/Method: {:?}",
                    name
                ))
            })?;
        match self.resolve_symbol(service).await? {
            Descriptor::Service(svc) => svc
                .methods()
                .find(|m| m.name() == method)
                .ok_or_else(|| {
                    ReflectRpcError::NotFound(format!(
                        "service {} does not include a method named {}",
                        service, method
                    ))
                    .into()
                }),
            other => Err(ReflectRpcError::InvalidParameter(format!(
                "{} is {}, not a service",
                service,
                other.kind().label()
            ))
            .into()),
        }
    }

    // Ask for the symbol itself, then for each enclosing scope, since servers
    // are not required to index members such as fields or sibling-scoped enum values.
    async fn fetch_symbol(&mut self, name: &str) -> Result<()> {
        let mut candidate = name;
        loop {
            if candidate != name && find_symbol(&self.pool, candidate).is_some() {
                // the enclosing scope is loaded already, the member just does not exist
                return Err(ReflectRpcError::NotFound(name.to_string()).into());
            }
            match self.client.file_containing_symbol(candidate).await {
                Ok(files) => {
                    tracing::debug!(
                        "fetched {} file(s) for symbol {}",
                        files.len(),
                        candidate
                    );
                    return self.add_files(files).await;
                }
                Err(e) if is_not_found(&e) => match candidate.rsplit_once('.') {
                    Some((scope, _)) => candidate = scope,
                    None => return Err(ReflectRpcError::NotFound(name.to_string()).into()),
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn add_files(&mut self, files: Vec<FileDescriptorProto>) -> Result<()> {
        let mut pending: BTreeMap<String, FileDescriptorProto> = BTreeMap::new();
        let mut missing: Vec<String> = Vec::new();
        for file in files {
            self.stage(file, &mut pending, &mut missing);
        }
        while let Some(dependency) = missing.pop() {
            if self.pool.get_file_by_name(&dependency).is_some() || pending.contains_key(&dependency)
            {
                continue;
            }
            for file in self.fetch_file(&dependency).await? {
                self.stage(file, &mut pending, &mut missing);
            }
        }
        if pending.is_empty() {
            return Ok(());
        }
        self.pool
            .add_file_descriptor_protos(pending.into_values())
            .map_err(|e| {
                ReflectRpcError::ReflectionError(format!("server sent invalid descriptors: {}", e))
            })?;
        Ok(())
    }

    fn stage(
        &self,
        file: FileDescriptorProto,
        pending: &mut BTreeMap<String, FileDescriptorProto>,
        missing: &mut Vec<String>,
    ) {
        if self.pool.get_file_by_name(file.name()).is_some() || pending.contains_key(file.name()) {
            return;
        }
        missing.extend(file.dependency.iter().cloned());
        pending.insert(file.name().to_string(), file);
    }

    async fn fetch_file(&mut self, filename: &str) -> Result<Vec<FileDescriptorProto>> {
        match self.client.file_by_filename(filename).await {
            Ok(files) => Ok(files),
            Err(e) if is_not_found(&e) => {
                match DescriptorPool::global().get_file_by_name(filename) {
                    Some(wkt) => {
                        tracing::debug!("using bundled descriptor for {}", filename);
                        Ok(vec![wkt.file_descriptor_proto().clone()])
                    }
                    None => Err(ReflectRpcError::ReflectionError(format!(
                        "server does not provide dependency file {}",
                        filename
                    ))
                    .into()),
                }
            }
            Err(e) => Err(e),
        }
    }
}

fn is_not_found(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<ReflectRpcError>(),
        Some(ReflectRpcError::NotFound(_))
    )
}
