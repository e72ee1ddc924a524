use std::sync::Arc;

use crate::{
    chain::{Chain, Link, LinkDescriptor, Next, OperationStream},
    operation::Operation,
};

type Condition = dyn Fn(&Operation) -> bool + Send + Sync;

/// 按谓词把操作路由到两条子链之一，例如让变更绕过批处理。
///
/// 子链各自以终端 Link 结尾，因此 `SplitLink` 本身也是终端：它不会调用外层的 `next`。
pub struct SplitLink {
    condition: Arc<Condition>,
    when_true: Chain,
    when_false: Chain,
}

impl SplitLink {
    pub fn new(
        condition: impl Fn(&Operation) -> bool + Send + Sync + 'static,
        when_true: Chain,
        when_false: Chain,
    ) -> Self {
        Self {
            condition: Arc::new(condition),
            when_true,
            when_false,
        }
    }
}

impl Link for SplitLink {
    fn descriptor(&self) -> LinkDescriptor {
        LinkDescriptor::new(
            "split",
            "routing",
            format!(
                "routes to [{}] or [{}]",
                names(&self.when_true),
                names(&self.when_false)
            ),
        )
    }

    fn call(&self, operation: Operation, _next: Next) -> OperationStream {
        let branch = if (self.condition)(&operation) {
            &self.when_true
        } else {
            &self.when_false
        };
        branch.execute(operation)
    }
}

fn names(chain: &Chain) -> String {
    chain
        .descriptors()
        .iter()
        .map(|descriptor| descriptor.name().to_owned())
        .collect::<Vec<_>>()
        .join(", ")
}
